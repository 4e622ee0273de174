//! Connection layer for remote host communication.
//!
//! The execution pool never talks to a transport directly. It asks a
//! [`Connector`] for a session to a [`Host`] and drives it through the
//! [`Connection`] trait, so the SSH backend and the local-process backend are
//! interchangeable (and tests can plug in a mock).
//!
//! # Supported Transports
//!
//! - **SSH** (via `russh`, default feature): agent, key and password auth,
//!   SFTP for staging escalation scripts
//! - **Local**: direct execution for `localhost`, `127.0.0.1` and `local`
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetexec::connection::{ConnectionConfig, ConnectionFactory, Connector};
//! use fleetexec::inventory::Host;
//!
//! let factory = ConnectionFactory::new(ConnectionConfig::default());
//! let conn = factory.connect(&Host::new("web1.example.com"), "deploy").await?;
//! let result = conn.execute("uname -a", None).await?;
//! println!("{}", result.combined_output());
//! ```

/// Connection configuration types.
pub mod config;

/// Local execution connection implementation.
pub mod local;

/// Pure Rust SSH implementation using russh.
#[cfg(feature = "russh")]
pub mod russh;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroizing;

pub use config::ConnectionConfig;
pub use local::LocalConnection;
#[cfg(feature = "russh")]
pub use russh::RusshConnection;

use crate::escalation::{EscalationMode, Secret, DEFAULT_TARGET_USER};
use crate::inventory::Host;

/// Russh-related error type - wraps russh::Error for the Handler trait
#[cfg(feature = "russh")]
#[derive(Debug)]
pub struct RusshError(pub ::russh::Error);

#[cfg(feature = "russh")]
impl From<::russh::Error> for RusshError {
    fn from(err: ::russh::Error) -> Self {
        RusshError(err)
    }
}

#[cfg(feature = "russh")]
impl std::fmt::Display for RusshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Russh error: {}", self.0)
    }
}

#[cfg(feature = "russh")]
impl std::error::Error for RusshError {}

#[cfg(feature = "russh")]
impl From<::russh::Error> for ConnectionError {
    fn from(err: ::russh::Error) -> Self {
        ConnectionError::SshError(format!("Russh error: {}", err))
    }
}

#[cfg(feature = "russh")]
impl From<russh_sftp::client::error::Error> for ConnectionError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        ConnectionError::TransferFailed(format!("SFTP error: {}", e))
    }
}

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish initial connection to the host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication was rejected by the remote host.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command execution failed (not to be confused with non-zero exit code).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload operation failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Connection or operation timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SSH-specific error from the underlying implementation.
    #[error("SSH error: {0}")]
    SshError(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl ConnectionError {
    /// True when the remote side refused our credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ConnectionError::AuthenticationFailed(_))
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
///
/// ```rust
/// use fleetexec::connection::CommandResult;
///
/// let result = CommandResult::success("Hello\n".into(), String::new());
/// assert!(result.success);
/// assert_eq!(result.exit_code, 0);
///
/// let failed = CommandResult::failure(1, "out\n".into(), "err\n".into());
/// assert_eq!(failed.combined_output(), "out\nerr\n");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Build a result from a raw exit status
    pub fn from_exit(exit_code: i32, stdout: String, stderr: String) -> Self {
        if exit_code == 0 {
            Self::success(stdout, stderr)
        } else {
            Self::failure(exit_code, stdout, stderr)
        }
    }

    /// Get the combined output (stdout followed by stderr)
    pub fn combined_output(&self) -> String {
        let mut output = String::with_capacity(self.stdout.len() + self.stderr.len());
        output.push_str(&self.stdout);
        output.push_str(&self.stderr);
        output
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Method for privilege escalation
    pub escalate_method: EscalationMode,
    /// User to escalate to (default: root)
    pub escalate_user: Option<String>,
    /// Password for privilege escalation operations
    pub escalate_password: Option<Secret>,
    /// Allocate a pseudo-terminal for the command
    pub pty: bool,
}

impl ExecuteOptions {
    /// Create new execute options
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable privilege escalation
    pub fn with_escalation(
        mut self,
        method: EscalationMode,
        user: impl Into<String>,
        password: Option<Secret>,
    ) -> Self {
        self.escalate_method = method;
        self.escalate_user = Some(user.into());
        self.escalate_password = password;
        self
    }

    /// Request a pseudo-terminal
    pub fn with_pty(mut self) -> Self {
        self.pty = true;
        self
    }

    /// Whether escalation is requested
    pub fn escalate(&self) -> bool {
        !self.escalate_method.is_none()
    }

    /// Target user of the escalation
    pub fn escalate_user(&self) -> &str {
        self.escalate_user.as_deref().unwrap_or(DEFAULT_TARGET_USER)
    }

    /// Whether the secret must be written to the command's stdin
    pub fn feeds_password(&self) -> bool {
        self.escalate() && self.escalate_password.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Line to write to the escalation prompt, wiped when dropped
    pub fn password_payload(&self) -> Option<Zeroizing<String>> {
        self.escalate_password
            .as_ref()
            .filter(|_| self.feeds_password())
            .map(|p| Zeroizing::new(format!("{}\n", p.expose())))
    }
}

/// Wrap a command line for the requested escalation method.
///
/// `sudo` reads the password from stdin with an empty prompt, or runs
/// non-interactively when there is no password so a missing NOPASSWD rule
/// fails instead of hanging. `su` always prompts on the terminal.
pub fn build_escalated_command(command: &str, options: &ExecuteOptions) -> String {
    let user = shell_words::quote(options.escalate_user());
    let inner = shell_words::quote(command);
    match options.escalate_method {
        EscalationMode::None => command.to_string(),
        EscalationMode::Sudo if options.feeds_password() => {
            format!("sudo -S -p '' -u {} -- sh -c {}", user, inner)
        }
        EscalationMode::Sudo => format!("sudo -n -u {} -- sh -c {}", user, inner),
        EscalationMode::Su => format!("su - {} -c {}", user, inner),
    }
}

/// Options for file transfer
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// File mode (permissions) to set
    pub mode: Option<u32>,
}

impl TransferOptions {
    /// Create new transfer options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set file mode
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// The main connection trait that all transport implementations must implement
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection identifier (hostname)
    fn identifier(&self) -> &str;

    /// Execute a command on the remote host
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Upload content directly to a remote file
    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()>;

    /// Close the connection, terminating anything still running on it
    async fn close(&self) -> ConnectionResult<()>;
}

/// Opens sessions for the execution pool.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session to `host`, logging in as `user`.
    async fn connect(&self, host: &Host, user: &str) -> ConnectionResult<Arc<dyn Connection>>;
}

/// Connection type enum for factory pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Local connection (no network)
    Local,
    /// SSH connection to remote host
    Ssh {
        host: String,
        port: u16,
        user: String,
    },
}

impl ConnectionType {
    /// Get a unique key for this connection type
    pub fn key(&self) -> String {
        match self {
            ConnectionType::Local => "local".to_string(),
            ConnectionType::Ssh { host, port, user } => format!("ssh://{}@{}:{}", user, host, port),
        }
    }
}

/// Factory for creating connections
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    /// Global configuration
    config: Arc<ConnectionConfig>,
}

impl ConnectionFactory {
    /// Create a new connection factory
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Transport configuration shared by every session
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Resolve a host to a connection type
    pub fn resolve_connection_type(&self, host: &Host, user: &str) -> ConnectionType {
        if host.is_local() {
            return ConnectionType::Local;
        }

        ConnectionType::Ssh {
            host: host.address.clone(),
            port: host.port.unwrap_or(self.config.port),
            user: user.to_string(),
        }
    }

    /// Create a new connection based on type
    async fn create_connection(
        &self,
        conn_type: &ConnectionType,
    ) -> ConnectionResult<Arc<dyn Connection>> {
        match conn_type {
            ConnectionType::Local => Ok(Arc::new(LocalConnection::new())),
            ConnectionType::Ssh { host, port, user } => {
                #[cfg(feature = "russh")]
                {
                    let conn = RusshConnection::connect(host, *port, user, &self.config).await?;
                    Ok(Arc::new(conn))
                }
                #[cfg(not(feature = "russh"))]
                {
                    let _ = (host, port, user);
                    Err(ConnectionError::InvalidConfig(
                        "No SSH backend available. Enable the 'russh' feature.".to_string(),
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl Connector for ConnectionFactory {
    async fn connect(&self, host: &Host, user: &str) -> ConnectionResult<Arc<dyn Connection>> {
        let conn_type = self.resolve_connection_type(host, user);
        tracing::debug!(target = %conn_type.key(), "Opening connection");
        self.create_connection(&conn_type).await
    }
}

/// Get the current username
pub fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}
