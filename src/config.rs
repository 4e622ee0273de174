//! Configuration module for fleetexec
//!
//! Configuration comes from, in increasing priority:
//! - Default values
//! - The first config file found (`--config`, `$FLEETEXEC_CONFIG`,
//!   `~/.fleetexec/config.toml`, `./fleetexec.toml`)
//! - Environment variables (`FLEETEXEC_*`)
//! - Command-line arguments, applied by the CLI

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::connection::config::{expand_path, ConnectionConfig};
use crate::connection::whoami;
use crate::error::{Error, Result};
use crate::escalation::{EscalationMode, EscalationState};
use crate::executor::PoolConfig;
use crate::inventory::InventoryCacheConfig;

/// How results are shown during and after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Print `host: line` as each host finishes
    #[default]
    Parallel,
    /// Like parallel, with a single session at a time
    Serial,
    /// Group hosts with identical output in the final report
    Collapse,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Parallel => "parallel",
            RunMode::Serial => "serial",
            RunMode::Collapse => "collapse",
        }
    }

    /// Whether output is printed per host as results arrive
    pub fn streams(self) -> bool {
        !matches!(self, RunMode::Collapse)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(RunMode::Parallel),
            "serial" => Ok(RunMode::Serial),
            "collapse" => Ok(RunMode::Collapse),
            other => Err(Error::config(format!(
                "unknown mode '{}', expected parallel, serial or collapse",
                other
            ))),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Login and cache settings
    pub main: MainConfig,

    /// Worker pool settings
    pub executor: ExecutorConfig,

    /// Inventory service settings
    pub inventory: InventorySettings,

    /// SSH transport settings
    pub ssh: SshSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    /// Remote login user, `$USER` when unset
    pub user: Option<String>,

    /// Escalation mode: none, sudo or su
    pub raise: String,

    /// Account to escalate to
    pub raise_user: String,

    /// Work-group cache directory
    pub cache_dir: String,

    /// Work-group cache TTL in hours
    pub cache_ttl: u64,

    /// Result display: parallel, serial or collapse
    pub mode: String,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            user: None,
            raise: "none".to_string(),
            raise_user: crate::escalation::DEFAULT_TARGET_USER.to_string(),
            cache_dir: "~/.fleetexec/cache".to_string(),
            cache_ttl: 24,
            mode: RunMode::default().as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum concurrent sessions
    pub ssh_threads: usize,

    /// Probe attempts per host, 0 disables probing
    pub ping_count: u32,

    /// Remote directory for staged scripts
    pub remote_tmpdir: String,

    /// Connect timeout in seconds
    pub connect_timeout: u64,

    /// Seconds a cancelled worker may spend closing its session
    pub cancel_grace: u64,

    /// Per-host command timeout in seconds
    pub command_timeout: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            ssh_threads: crate::executor::pool::DEFAULT_WORKERS,
            ping_count: crate::executor::pool::DEFAULT_PROBE_COUNT,
            remote_tmpdir: crate::executor::pool::DEFAULT_REMOTE_TMPDIR.to_string(),
            connect_timeout: crate::connection::config::DEFAULT_TIMEOUT,
            cancel_grace: 5,
            command_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySettings {
    /// Base URL of the inventory service
    pub url: Option<String>,

    /// Groups preloaded by `fleetexec hosts`
    pub work_groups: Vec<String>,

    /// Lookup timeout in seconds
    pub timeout: u64,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            url: None,
            work_groups: Vec::new(),
            timeout: crate::inventory::DEFAULT_LOOKUP_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Port for hosts without an explicit one
    pub port: u16,

    /// Private keys to try
    pub identity_files: Vec<String>,

    /// Use the SSH agent
    pub use_agent: bool,

    /// Accept hosts missing from known_hosts
    pub accept_unknown_hosts: bool,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            port: crate::connection::config::DEFAULT_PORT,
            identity_files: Vec::new(),
            use_agent: true,
            accept_unknown_hosts: true,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match Self::search_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Config::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config files checked when no explicit path is given
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(env_config) = std::env::var("FLEETEXEC_CONFIG") {
            paths.push(expand_path(&env_config));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".fleetexec").join("config.toml"));
        }
        paths.push(PathBuf::from("fleetexec.toml"));

        paths
    }

    /// Parse one config file, picking the format from its extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loading config file");

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(user) = std::env::var("FLEETEXEC_USER") {
            self.main.user = Some(user);
        }

        if let Ok(threads) = std::env::var("FLEETEXEC_THREADS") {
            match threads.parse() {
                Ok(n) => self.executor.ssh_threads = n,
                Err(_) => warn!(value = %threads, "Ignoring invalid FLEETEXEC_THREADS"),
            }
        }

        if let Ok(raise) = std::env::var("FLEETEXEC_RAISE") {
            self.main.raise = raise;
        }

        if let Ok(url) = std::env::var("FLEETEXEC_INVENTORY_URL") {
            self.inventory.url = Some(url);
        }

        if let Ok(dir) = std::env::var("FLEETEXEC_CACHE_DIR") {
            self.main.cache_dir = dir;
        }

        if let Ok(mode) = std::env::var("FLEETEXEC_MODE") {
            self.main.mode = mode;
        }
    }

    /// Check the values can drive a run
    pub fn validate(&self) -> Result<()> {
        if self.executor.ssh_threads == 0 {
            return Err(Error::config("executor.ssh_threads must be at least 1"));
        }
        self.raise_mode()?;
        self.run_mode()?;
        if self.main.cache_ttl == 0 {
            return Err(Error::config("main.cache_ttl must be at least 1 hour"));
        }
        Ok(())
    }

    /// The configured escalation mode
    pub fn raise_mode(&self) -> Result<EscalationMode> {
        self.main.raise.parse()
    }

    /// The configured result display
    pub fn run_mode(&self) -> Result<RunMode> {
        self.main.mode.parse()
    }

    /// Effective login user
    pub fn user(&self) -> String {
        self.main
            .user
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(whoami)
    }

    pub fn cache_dir(&self) -> PathBuf {
        expand_path(&self.main.cache_dir)
    }

    pub fn cache_config(&self) -> InventoryCacheConfig {
        InventoryCacheConfig::default()
            .with_ttl(Duration::from_secs(self.main.cache_ttl * 3600))
            .with_persistence(self.cache_dir())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.executor.ssh_threads,
            probe_count: self.executor.ping_count,
            probe_port: self.ssh.port,
            remote_tmpdir: PathBuf::from(&self.executor.remote_tmpdir),
            cancel_grace: Duration::from_secs(self.executor.cancel_grace),
            ..PoolConfig::default()
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            port: self.ssh.port,
            timeout: self.executor.connect_timeout,
            identity_files: self.ssh.identity_files.clone(),
            use_agent: self.ssh.use_agent,
            password: None,
            accept_unknown_hosts: self.ssh.accept_unknown_hosts,
        }
    }

    /// Initial escalation state for the process
    pub fn escalation_state(&self) -> Result<EscalationState> {
        let mut state = EscalationState::new(self.user()).with_mode(self.raise_mode()?);
        state.target_user = self.main.raise_user.clone();
        Ok(state)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.executor.command_timeout.map(Duration::from_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.inventory.timeout)
    }
}
