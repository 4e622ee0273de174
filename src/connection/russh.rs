//! Russh connection module
//!
//! SSH sessions built on the async-native russh crate. One session is opened
//! per host per dispatch; commands run on fresh channels, escalation scripts
//! are staged over SFTP.

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::ChannelMsg;
use russh_keys::agent::client::AgentClient;
use russh_sftp::client::SftpSession;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::config::{default_identity_files, expand_path, ConnectionConfig, DEFAULT_PORT};
use super::{
    build_escalated_command, CommandResult, Connection, ConnectionError, ConnectionResult,
    ExecuteOptions, RusshError, TransferOptions,
};

/// Substring shared by sudo/su password prompts
const PASSWORD_PROMPT: &str = "assword";

/// Terminal geometry for escalation PTYs
const PTY_COLUMNS: u32 = 200;
const PTY_ROWS: u32 = 50;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
enum HostKeyStatus {
    /// Key matches known_hosts entry
    Verified,
    /// Host not found in known_hosts (first connection)
    Unknown,
    /// Key doesn't match known_hosts entry
    Mismatch,
}

/// Client handler for russh with host key verification
struct ClientHandler {
    host: String,
    port: u16,
    known_hosts: Vec<KnownHostEntry>,
    accept_unknown: bool,
}

/// A parsed entry from known_hosts file
#[derive(Debug, Clone)]
struct KnownHostEntry {
    patterns: Vec<String>,
    key: PublicKey,
}

impl ClientHandler {
    fn new(host: &str, port: u16, accept_unknown: bool) -> Self {
        Self {
            host: host.to_string(),
            port,
            known_hosts: Self::load_known_hosts(),
            accept_unknown,
        }
    }

    /// Load and parse ~/.ssh/known_hosts
    fn load_known_hosts() -> Vec<KnownHostEntry> {
        let path = match dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")) {
            Some(p) if p.exists() => p,
            _ => return Vec::new(),
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Failed to read known_hosts file");
                return Vec::new();
            }
        };

        let entries: Vec<_> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(Self::parse_known_hosts_line)
            .collect();

        debug!(entry_count = %entries.len(), "Loaded known_hosts entries");
        entries
    }

    /// Parse `hostname[,hostname...] keytype base64key [comment]`
    fn parse_known_hosts_line(line: &str) -> Option<KnownHostEntry> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            return None;
        }

        let patterns = parts[0].split(',').map(str::to_string).collect();
        let key_bytes =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, parts[2]).ok()?;

        match russh::keys::key::parse_public_key(&key_bytes, None) {
            Ok(key) => Some(KnownHostEntry { patterns, key }),
            Err(_) => {
                trace!(key_type = %parts[1], "Failed to parse key, skipping entry");
                None
            }
        }
    }

    fn pattern_matches(pattern: &str, host: &str, port: u16) -> bool {
        // [host]:port
        if let Some(rest) = pattern.strip_prefix('[') {
            if let Some((pattern_host, tail)) = rest.split_once(']') {
                let pattern_port = tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or(DEFAULT_PORT);
                return pattern_host == host && pattern_port == port;
            }
        }

        if port == DEFAULT_PORT && pattern == host {
            return true;
        }

        if pattern.contains('*') || pattern.contains('?') {
            return Self::wildcard_match(pattern, host);
        }

        false
    }

    fn wildcard_match(pattern: &str, text: &str) -> bool {
        let pattern: Vec<char> = pattern.chars().collect();
        let text: Vec<char> = text.chars().collect();
        Self::wildcard_match_chars(&pattern, &text)
    }

    fn wildcard_match_chars(pattern: &[char], text: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('*', rest)) => {
                (0..=text.len()).any(|i| Self::wildcard_match_chars(rest, &text[i..]))
            }
            Some(('?', rest)) => !text.is_empty() && Self::wildcard_match_chars(rest, &text[1..]),
            Some((c, rest)) => {
                text.first() == Some(c) && Self::wildcard_match_chars(rest, &text[1..])
            }
        }
    }

    fn verify_host_key(&self, server_key: &PublicKey) -> HostKeyStatus {
        for entry in &self.known_hosts {
            if entry
                .patterns
                .iter()
                .any(|p| Self::pattern_matches(p, &self.host, self.port))
            {
                if entry.key.fingerprint() == server_key.fingerprint() {
                    return HostKeyStatus::Verified;
                }
                return HostKeyStatus::Mismatch;
            }
        }

        HostKeyStatus::Unknown
    }
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = RusshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.verify_host_key(server_public_key) {
            HostKeyStatus::Verified => {
                trace!(host = %self.host, "Host key verified against known_hosts");
                Ok(true)
            }
            HostKeyStatus::Unknown if self.accept_unknown => {
                debug!(host = %self.host, "Host not found in known_hosts, accepting");
                Ok(true)
            }
            HostKeyStatus::Unknown => {
                warn!(host = %self.host, "Host not found in known_hosts, rejecting");
                Ok(false)
            }
            HostKeyStatus::Mismatch => {
                warn!(
                    host = %self.host,
                    "HOST KEY VERIFICATION FAILED! Server key does not match known_hosts entry."
                );
                Ok(false)
            }
        }
    }
}

/// SSH session to one host.
///
/// The handle sits behind an `RwLock`: channel opens take the read lock
/// briefly, so [`Connection::close`] can take the write lock and disconnect
/// while a command is still running on another task.
pub struct RusshConnection {
    identifier: String,
    handle: Arc<RwLock<Option<Handle<ClientHandler>>>>,
    connected: Arc<AtomicBool>,
}

impl RusshConnection {
    /// Connect to a remote host via SSH using russh
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        config: &ConnectionConfig,
    ) -> ConnectionResult<Self> {
        debug!(host = %host, port = %port, user = %user, "Connecting via SSH (russh)");

        let handle = Self::do_connect(host, port, user, config).await?;

        Ok(Self {
            identifier: format!("{}@{}:{}", user, host, port),
            handle: Arc::new(RwLock::new(Some(handle))),
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    async fn do_connect(
        host: &str,
        port: u16,
        user: &str,
        config: &ConnectionConfig,
    ) -> ConnectionResult<Handle<ClientHandler>> {
        let timeout = config.timeout_duration();
        let ssh_config = Arc::new(russh::client::Config::default());

        let addr = format!("{}:{}", host, port);
        let socket = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))?
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        socket.set_nodelay(true).map_err(|e| {
            ConnectionError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        let handler = ClientHandler::new(host, port, config.accept_unknown_hosts);

        let mut session = tokio::time::timeout(
            timeout,
            russh::client::connect_stream(ssh_config, socket, handler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))?
        .map_err(|e| ConnectionError::ConnectionFailed(format!("SSH handshake failed: {}", e)))?;

        Self::authenticate(&mut session, user, config).await?;

        trace!(host = %host, "SSH connection established");
        Ok(session)
    }

    /// Agent, then configured keys, then ~/.ssh defaults, then password
    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        user: &str,
        config: &ConnectionConfig,
    ) -> ConnectionResult<()> {
        if config.use_agent && Self::try_agent_auth(session, user).await.is_ok() {
            debug!("Authenticated using SSH agent");
            return Ok(());
        }

        let key_paths: Vec<PathBuf> = config
            .identity_files
            .iter()
            .map(|f| expand_path(f))
            .chain(default_identity_files())
            .collect();

        for key_path in key_paths {
            match Self::try_key_auth(session, user, &key_path).await {
                Ok(()) => {
                    debug!(key = %key_path.display(), "Authenticated using key");
                    return Ok(());
                }
                Err(e) => trace!(key = %key_path.display(), error = %e, "Key rejected"),
            }
        }

        if let Some(password) = &config.password {
            let authenticated = session
                .authenticate_password(user, password)
                .await
                .map_err(|e| {
                    ConnectionError::AuthenticationFailed(format!(
                        "Password authentication failed: {}",
                        e
                    ))
                })?;

            if authenticated {
                debug!("Authenticated using password");
                return Ok(());
            }
        }

        Err(ConnectionError::AuthenticationFailed(format!(
            "All authentication methods failed for user '{}'",
            user
        )))
    }

    async fn try_agent_auth(
        session: &mut Handle<ClientHandler>,
        user: &str,
    ) -> ConnectionResult<()> {
        let mut agent = AgentClient::connect_env().await.map_err(|e| {
            ConnectionError::AuthenticationFailed(format!("Failed to connect to SSH agent: {}", e))
        })?;

        let identities = agent.request_identities().await.map_err(|e| {
            ConnectionError::AuthenticationFailed(format!("Failed to get agent identities: {}", e))
        })?;

        for identity in identities {
            let (returned_agent, result) = session
                .authenticate_future(user, identity.clone(), agent)
                .await;
            agent = returned_agent;

            match result {
                Ok(true) => return Ok(()),
                Ok(false) => trace!("Identity rejected, trying next"),
                Err(e) => trace!(error = %e, "Agent authentication attempt failed"),
            }
        }

        Err(ConnectionError::AuthenticationFailed(
            "No SSH agent identity accepted".to_string(),
        ))
    }

    async fn try_key_auth(
        session: &mut Handle<ClientHandler>,
        user: &str,
        key_path: &Path,
    ) -> ConnectionResult<()> {
        if !key_path.exists() {
            return Err(ConnectionError::AuthenticationFailed(format!(
                "Key file not found: {}",
                key_path.display()
            )));
        }

        let key_pair = load_secret_key(key_path, None).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!(
                "Failed to load key {}: {}",
                key_path.display(),
                e
            ))
        })?;

        let authenticated = session
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "Key authentication failed for {}: {}",
                    key_path.display(),
                    e
                ))
            })?;

        if authenticated {
            Ok(())
        } else {
            Err(ConnectionError::AuthenticationFailed(
                "Key authentication failed".to_string(),
            ))
        }
    }

    async fn open_sftp(&self) -> ConnectionResult<SftpSession> {
        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(ConnectionError::ConnectionClosed)?;

        let channel = handle.channel_open_session().await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to open channel: {}", e))
        })?;
        drop(handle_guard);

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        SftpSession::new(channel.into_stream()).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to create SFTP session: {}", e))
        })
    }
}

/// Exit code reported when the server sends neither a status nor a signal
const UNKNOWN_EXIT_CODE: i32 = 255;

/// Shell-style exit code for a command killed by `sig`
fn signal_exit_code(sig: &russh::Sig) -> i32 {
    let signo = match sig {
        russh::Sig::HUP => 1,
        russh::Sig::INT => 2,
        russh::Sig::QUIT => 3,
        russh::Sig::ILL => 4,
        russh::Sig::ABRT => 6,
        russh::Sig::FPE => 8,
        russh::Sig::KILL => 9,
        russh::Sig::USR1 => 10,
        russh::Sig::SEGV => 11,
        russh::Sig::PIPE => 13,
        russh::Sig::ALRM => 14,
        russh::Sig::TERM => 15,
        russh::Sig::Custom(_) => return UNKNOWN_EXIT_CODE,
    };
    128 + signo
}

/// Normalize PTY line endings. Once the password was typed, the terminal
/// echoes the newline that ended it; that single line break is dropped.
fn clean_pty_output(raw: &[u8], password_sent: bool) -> String {
    let text = String::from_utf8_lossy(raw).replace("\r\n", "\n");
    match text.strip_prefix('\n') {
        Some(rest) if password_sent => rest.to_string(),
        _ => text,
    }
}

#[async_trait]
impl Connection for RusshConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        let full_command = build_escalated_command(command, &options);

        trace!(host = %self.identifier, command = %command, escalate = %options.escalate_method, "Executing remote command");

        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(ConnectionError::ConnectionClosed)?;
        let mut channel = handle.channel_open_session().await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to open channel: {}", e))
        })?;
        drop(handle_guard);

        if options.pty {
            channel
                .request_pty(true, "xterm", PTY_COLUMNS, PTY_ROWS, 0, 0, &[])
                .await
                .map_err(|e| {
                    ConnectionError::ExecutionFailed(format!("Failed to request PTY: {}", e))
                })?;
        }

        channel.exec(true, full_command).await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to execute command: {}", e))
        })?;

        // On a PTY the secret is only sent once the prompt shows up, otherwise
        // it would be echoed back as output.
        let mut awaiting_prompt = None;
        let mut password_sent = false;
        match options.password_payload() {
            Some(payload) if options.pty => awaiting_prompt = Some(payload),
            Some(payload) => {
                let mut cursor = tokio::io::BufReader::new(payload.as_bytes());
                channel.data(&mut cursor).await.map_err(|e| {
                    ConnectionError::ExecutionFailed(format!("Failed to write password: {}", e))
                })?;
            }
            None => {}
        }
        if awaiting_prompt.is_none() {
            let _ = channel.eof().await;
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        let mut exit_signal = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    stdout.extend_from_slice(data);
                    if let Some(payload) = awaiting_prompt.take() {
                        let (prompted, full_line) = {
                            let seen = String::from_utf8_lossy(&stdout);
                            (seen.contains(PASSWORD_PROMPT), seen.contains('\n'))
                        };
                        if prompted {
                            stdout.clear();
                            let mut cursor = tokio::io::BufReader::new(payload.as_bytes());
                            channel.data(&mut cursor).await.map_err(|e| {
                                ConnectionError::ExecutionFailed(format!(
                                    "Failed to write password: {}",
                                    e
                                ))
                            })?;
                            password_sent = true;
                            let _ = channel.eof().await;
                        } else if full_line {
                            // Output started without a prompt, nothing will ask for it
                            trace!(host = %self.identifier, "No password prompt before output");
                            let _ = channel.eof().await;
                        } else {
                            awaiting_prompt = Some(payload);
                        }
                    }
                }
                ChannelMsg::ExtendedData { ref data, ext } => {
                    if ext == 1 {
                        stderr.extend_from_slice(data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status);
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    exit_signal = Some(signal_name);
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionClosed);
        }

        // Killed by a signal: no exit status is sent
        let exit_code: i32 = match (exit_code, exit_signal.as_ref()) {
            (Some(code), _) => i32::try_from(code).unwrap_or(UNKNOWN_EXIT_CODE),
            (None, Some(sig)) => signal_exit_code(sig),
            (None, None) => UNKNOWN_EXIT_CODE,
        };
        let stdout = if options.pty {
            clean_pty_output(&stdout, password_sent)
        } else {
            String::from_utf8_lossy(&stdout).to_string()
        };
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        trace!(host = %self.identifier, exit_code = %exit_code, "Command completed");
        Ok(CommandResult::from_exit(exit_code, stdout, stderr))
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(remote = %remote_path.display(), size = %content.len(), "Uploading content via SFTP");

        let sftp = self.open_sftp().await?;

        let remote_path_str = remote_path.to_string_lossy().to_string();
        let mut remote_file = sftp.create(&remote_path_str).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to create remote file {}: {}",
                remote_path.display(),
                e
            ))
        })?;

        remote_file.write_all(content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to write to remote file: {}", e))
        })?;
        remote_file.shutdown().await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to close remote file: {}", e))
        })?;
        drop(remote_file);

        if let Some(mode) = options.mode {
            let attrs = russh_sftp::protocol::FileAttributes {
                permissions: Some(mode),
                ..Default::default()
            };
            sftp.set_metadata(&remote_path_str, attrs)
                .await
                .map_err(|e| {
                    ConnectionError::TransferFailed(format!(
                        "Failed to set file permissions: {}",
                        e
                    ))
                })?;
        }

        Ok(())
    }

    async fn close(&self) -> ConnectionResult<()> {
        debug!(
            identifier = %self.identifier,
            "Closing SSH connection"
        );

        self.connected.store(false, Ordering::SeqCst);

        let handle = self.handle.write().await.take();
        if let Some(handle) = handle {
            let _ = handle
                .disconnect(
                    russh::Disconnect::ByApplication,
                    "Connection closed by client",
                    "en",
                )
                .await;
        }

        Ok(())
    }
}

impl std::fmt::Debug for RusshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshConnection")
            .field("identifier", &self.identifier)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}
