//! Shared test utilities for the fleetexec test suite.
//!
//! This module provides:
//! - A scriptable [`MockConnector`] / [`MockConnection`] pair
//! - A [`MockProber`] that fails selected hosts
//! - A [`CountingInventoryClient`] for coalescing tests
//! - Builders for pools and engines wired to the mocks
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use fleetexec::connection::{
    CommandResult, Connection, ConnectionError, ConnectionResult, Connector, ExecuteOptions,
    TransferOptions,
};
use fleetexec::escalation::EscalationManager;
use fleetexec::executor::{Engine, ExecutionPool, PoolConfig, Prober};
use fleetexec::inventory::{
    Host, InventoryCache, InventoryCacheConfig, InventoryClient, InventoryResolver, LookupError,
};

// ============================================================================
// Mock Connection
// ============================================================================

/// How a mocked host behaves once a session is open
#[derive(Debug, Clone)]
pub enum HostBehavior {
    /// Every command returns this result after `delay`
    Respond { result: CommandResult, delay: Duration },
    /// The session cannot be opened
    ConnectFails(String),
    /// The login is rejected
    AuthFails(String),
    /// Commands never finish
    Hang,
    /// Commands never finish and closing the session never returns either
    HangOnClose,
}

impl HostBehavior {
    pub fn output(exit_code: i32, stdout: &str) -> Self {
        HostBehavior::Respond {
            result: CommandResult::from_exit(exit_code, stdout.to_string(), String::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(exit_code: i32, stdout: &str, delay: Duration) -> Self {
        HostBehavior::Respond {
            result: CommandResult::from_exit(exit_code, stdout.to_string(), String::new()),
            delay,
        }
    }
}

/// A command the mock saw, with the escalation options it came with
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    pub host: String,
    pub command: String,
    pub options: Option<ExecuteOptions>,
}

/// Session handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockConnection {
    identifier: String,
    behavior: HostBehavior,
    shared: Arc<MockShared>,
    closed: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        self.shared.commands.write().push(RecordedCommand {
            host: self.identifier.clone(),
            command: command.to_string(),
            options,
        });

        if command.starts_with("rm -f ") {
            return Ok(CommandResult::success(String::new(), String::new()));
        }

        match &self.behavior {
            HostBehavior::Respond { result, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                Ok(result.clone())
            }
            HostBehavior::Hang | HostBehavior::HangOnClose => {
                std::future::pending::<()>().await;
                Err(ConnectionError::ConnectionClosed)
            }
            HostBehavior::ConnectFails(msg) | HostBehavior::AuthFails(msg) => {
                Err(ConnectionError::ExecutionFailed(msg.clone()))
            }
        }
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        self.shared.uploads.write().push(Upload {
            host: self.identifier.clone(),
            path: remote_path.to_path_buf(),
            content: String::from_utf8_lossy(content).into_owned(),
            mode: options.and_then(|o| o.mode),
        });
        Ok(())
    }

    async fn close(&self) -> ConnectionResult<()> {
        if matches!(self.behavior, HostBehavior::HangOnClose) {
            std::future::pending::<()>().await;
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A staged script the mock received
#[derive(Debug, Clone)]
pub struct Upload {
    pub host: String,
    pub path: PathBuf,
    pub content: String,
    pub mode: Option<u32>,
}

#[derive(Debug, Default)]
pub struct MockShared {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub open: AtomicUsize,
    pub max_open: AtomicUsize,
    pub users: RwLock<Vec<String>>,
    pub commands: RwLock<Vec<RecordedCommand>>,
    pub uploads: RwLock<Vec<Upload>>,
}

// ============================================================================
// Mock Connector
// ============================================================================

/// Connector whose hosts follow scripted behaviors.
///
/// Hosts without a script answer `default_behavior`.
#[derive(Debug)]
pub struct MockConnector {
    behaviors: RwLock<HashMap<String, HostBehavior>>,
    default_behavior: HostBehavior,
    pub shared: Arc<MockShared>,
}

impl MockConnector {
    pub fn new(default_behavior: HostBehavior) -> Self {
        Self {
            behaviors: RwLock::new(HashMap::new()),
            default_behavior,
            shared: Arc::new(MockShared::default()),
        }
    }

    /// Every host prints `stdout` and exits with `exit_code`
    pub fn responding(exit_code: i32, stdout: &str) -> Self {
        Self::new(HostBehavior::output(exit_code, stdout))
    }

    pub fn with_host(self, host: &str, behavior: HostBehavior) -> Self {
        self.behaviors.write().insert(host.to_string(), behavior);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.shared.max_open.load(Ordering::SeqCst)
    }

    pub fn users(&self) -> Vec<String> {
        self.shared.users.read().clone()
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.shared.commands.read().clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.shared.uploads.read().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &Host, user: &str) -> ConnectionResult<Arc<dyn Connection>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.users.write().push(user.to_string());

        let behavior = self
            .behaviors
            .read()
            .get(&host.name())
            .cloned()
            .unwrap_or_else(|| self.default_behavior.clone());

        match behavior {
            HostBehavior::ConnectFails(msg) => Err(ConnectionError::ConnectionFailed(msg)),
            HostBehavior::AuthFails(msg) => Err(ConnectionError::AuthenticationFailed(msg)),
            behavior => {
                let open = self.shared.open.fetch_add(1, Ordering::SeqCst) + 1;
                self.shared.max_open.fetch_max(open, Ordering::SeqCst);
                Ok(Arc::new(MockConnection {
                    identifier: host.name(),
                    behavior,
                    shared: Arc::clone(&self.shared),
                    closed: std::sync::atomic::AtomicBool::new(false),
                }))
            }
        }
    }
}

// ============================================================================
// Mock Prober
// ============================================================================

/// Prober that fails a fixed set of hosts
#[derive(Debug, Default)]
pub struct MockProber {
    unreachable: HashSet<String>,
    pub probes: AtomicUsize,
}

impl MockProber {
    pub fn failing<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unreachable: hosts.into_iter().map(Into::into).collect(),
            probes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(&self, host: &Host) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        !self.unreachable.contains(&host.name())
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// Inventory client that counts fetches and can be switched to failing
#[derive(Debug, Default)]
pub struct CountingInventoryClient {
    groups: RwLock<HashMap<String, Vec<Host>>>,
    pub calls: AtomicUsize,
    failing: std::sync::atomic::AtomicBool,
    delay: Duration,
}

impl CountingInventoryClient {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(20),
            ..Self::default()
        }
    }

    pub fn with_group(self, group: &str, hosts: &[&str]) -> Self {
        self.groups
            .write()
            .insert(group.to_string(), hosts.iter().map(|h| Host::new(*h)).collect());
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventoryClient for CountingInventoryClient {
    async fn fetch(&self, group: &str) -> Result<Vec<Host>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(LookupError::Http("connection refused".to_string()));
        }
        self.groups
            .read()
            .get(group)
            .cloned()
            .ok_or(LookupError::NotFound)
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Pool over `connector` with `workers` slots and no real probing
pub fn mock_pool(connector: Arc<MockConnector>, workers: usize, prober: Arc<dyn Prober>) -> ExecutionPool {
    let config = PoolConfig::default()
        .with_workers(workers)
        .with_cancel_grace(Duration::from_millis(200));
    ExecutionPool::new(connector, config)
        .expect("valid pool config")
        .with_prober(prober)
}

/// Resolver over `client` with an in-memory cache
pub fn mock_resolver(client: Arc<CountingInventoryClient>) -> InventoryResolver {
    let cache = InventoryCache::new(InventoryCacheConfig::default());
    InventoryResolver::new(client, Arc::new(cache))
}

/// Engine wired to mocks
pub fn mock_engine(
    connector: Arc<MockConnector>,
    prober: Arc<dyn Prober>,
    workers: usize,
    escalation: Arc<EscalationManager>,
) -> Engine {
    let client = Arc::new(CountingInventoryClient::new());
    Engine::new(
        Arc::new(mock_resolver(client)),
        escalation,
        mock_pool(connector, workers, prober),
    )
}

/// Hosts named `prefix1..=prefixN`
pub fn hosts(prefix: &str, n: usize) -> Vec<Host> {
    (1..=n).map(|i| Host::new(format!("{}{}", prefix, i))).collect()
}
