//! Bounded remote execution pool.
//!
//! Every host handed to [`ExecutionPool::dispatch`] becomes one worker task.
//! A pool-wide [`Semaphore`] caps how many of them hold a remote session at
//! the same time; the rest queue for a slot. Each worker reports exactly one
//! [`HostOutcome`] on the returned stream, including when the run is
//! cancelled, times out, or the worker itself fails.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::outcome::{HostOutcome, UnreachableReason};
use super::probe::{Prober, TcpProber};
use super::session::{ExecutionUnit, Session};
use crate::connection::Connector;
use crate::error::{Error, Result};
use crate::escalation::EscalationState;
use crate::inventory::Host;

/// Default number of concurrent sessions
pub const DEFAULT_WORKERS: usize = 50;
/// Default number of reachability probe attempts
pub const DEFAULT_PROBE_COUNT: u32 = 5;
/// Default staging directory for scripts on the remote side
pub const DEFAULT_REMOTE_TMPDIR: &str = "/tmp";

/// Stream of per-host outcomes from one dispatch
pub type OutcomeStream = ReceiverStream<HostOutcome>;

/// Pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of in-flight sessions
    pub workers: usize,
    /// Probe attempts per host, 0 disables probing
    pub probe_count: u32,
    /// Port the probe connects to when a host has none
    pub probe_port: u16,
    /// Timeout of a single probe attempt
    pub probe_timeout: Duration,
    /// Where scripts are staged on the remote side
    pub remote_tmpdir: PathBuf,
    /// How long a cancelled worker may spend closing its session
    pub cancel_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            probe_count: DEFAULT_PROBE_COUNT,
            probe_port: 22,
            probe_timeout: Duration::from_secs(1),
            remote_tmpdir: PathBuf::from(DEFAULT_REMOTE_TMPDIR),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_probe_count(mut self, probe_count: u32) -> Self {
        self.probe_count = probe_count;
        self
    }

    pub fn with_remote_tmpdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.remote_tmpdir = dir.into();
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("worker count must be at least 1"));
        }
        if self.remote_tmpdir.as_os_str().is_empty() {
            return Err(Error::config("remote tmpdir must not be empty"));
        }
        Ok(())
    }
}

/// Bounded pool of remote workers
pub struct ExecutionPool {
    connector: Arc<dyn Connector>,
    prober: Arc<dyn Prober>,
    semaphore: Arc<Semaphore>,
    config: Arc<PoolConfig>,
}

impl ExecutionPool {
    /// Create a pool. Probing uses [`TcpProber`] built from `config`.
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let prober = TcpProber::new(config.probe_port, config.probe_count, config.probe_timeout);
        Ok(Self {
            connector,
            prober: Arc::new(prober),
            semaphore: Arc::new(Semaphore::new(config.workers)),
            config: Arc::new(config),
        })
    }

    /// Replace the reachability prober
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Slots not currently held by a worker
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Submit `command` for every host.
    ///
    /// All units share `snapshot`. The stream ends once every host has
    /// reported.
    pub fn dispatch(
        &self,
        hosts: Vec<Host>,
        command: &str,
        snapshot: Arc<EscalationState>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> OutcomeStream {
        let (tx, rx) = mpsc::channel(self.config.workers.max(1));
        let command: Arc<str> = Arc::from(command);

        info!(
            host_count = hosts.len(),
            workers = self.config.workers,
            mode = %snapshot.mode,
            "Dispatching command"
        );

        let mut set = JoinSet::new();
        for (index, host) in hosts.iter().enumerate() {
            let unit = ExecutionUnit {
                host: host.clone(),
                command: Arc::clone(&command),
                snapshot: Arc::clone(&snapshot),
            };
            let session = Session::new(
                unit,
                Arc::clone(&self.connector),
                Arc::clone(&self.prober),
                self.config.remote_tmpdir.clone(),
            );
            let semaphore = Arc::clone(&self.semaphore);
            let cancel = cancel.clone();
            let grace = self.config.cancel_grace;

            set.spawn(async move {
                let outcome = run_worker(session, semaphore, timeout, cancel, grace).await;
                (index, outcome)
            });
        }

        tokio::spawn(drain(set, hosts, tx));
        ReceiverStream::new(rx)
    }
}

impl std::fmt::Debug for ExecutionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPool")
            .field("config", &self.config)
            .field("available_slots", &self.available_slots())
            .finish()
    }
}

async fn run_worker(
    session: Session,
    semaphore: Arc<Semaphore>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    grace: Duration,
) -> HostOutcome {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            trace!(host = %session.host(), "Cancelled before start");
            return HostOutcome::unreachable(session.host().clone(), UnreachableReason::Cancelled);
        }
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                return HostOutcome::unreachable(session.host().clone(), UnreachableReason::Cancelled);
            }
        },
    };

    let run = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, session.run()).await.ok(),
            None => Some(session.run().await),
        }
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UnreachableReason::Cancelled),
        outcome = run => outcome.ok_or(UnreachableReason::TimedOut),
    };

    match result {
        Ok(outcome) => outcome,
        Err(reason) => {
            debug!(host = %session.host(), reason = %reason, "Stopping worker");
            session.abort(grace).await;
            HostOutcome::unreachable(session.host().clone(), reason)
        }
    }
}

/// Forward worker results and cover hosts whose worker died.
async fn drain(
    mut set: JoinSet<(usize, HostOutcome)>,
    hosts: Vec<Host>,
    tx: mpsc::Sender<HostOutcome>,
) {
    let mut reported = vec![false; hosts.len()];

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome)) => {
                reported[index] = true;
                if tx.send(outcome).await.is_err() {
                    debug!("Outcome receiver dropped, abandoning dispatch");
                    return;
                }
            }
            Err(e) => error!(error = %e, "Worker task failed"),
        }
    }

    for (host, _) in hosts.into_iter().zip(reported).filter(|(_, done)| !done) {
        let reason = UnreachableReason::ConnectFailed("worker task failed".to_string());
        if tx.send(HostOutcome::unreachable(host, reason)).await.is_err() {
            return;
        }
    }
}
