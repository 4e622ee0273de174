//! Connection configuration module
//!
//! Settings shared by every SSH session the pool opens: port, timeouts,
//! identity files and host key policy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default connection timeout in seconds
pub const DEFAULT_TIMEOUT: u64 = 10;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Transport settings for outgoing sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Port used when a host does not carry its own
    #[serde(default = "default_port")]
    pub port: u16,

    /// TCP connect + handshake timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Private keys to try before the ~/.ssh defaults
    #[serde(default)]
    pub identity_files: Vec<String>,

    /// Use SSH agent for authentication
    #[serde(default = "default_true")]
    pub use_agent: bool,

    /// Login password, tried after every key
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Accept hosts missing from known_hosts (StrictHostKeyChecking=accept-new)
    #[serde(default = "default_true")]
    pub accept_unknown_hosts: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

fn default_true() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            identity_files: Vec::new(),
            use_agent: true,
            password: None,
            accept_unknown_hosts: true,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout in seconds
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add an identity file
    pub fn with_identity_file(mut self, path: impl Into<String>) -> Self {
        self.identity_files.push(path.into());
        self
    }

    /// Get the connect timeout as a Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Expand a path with ~ and environment variables
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or_else(|_| path.into());
    PathBuf::from(expanded.as_ref())
}

/// Get default identity files to try
pub fn default_identity_files() -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    let ssh_dir = home.join(".ssh");

    ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|p| p.exists())
        .collect()
}
