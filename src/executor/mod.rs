//! Remote execution for fleetexec
//!
//! This module provides:
//! - [`ExecutionPool`]: bounded concurrent dispatch of one command to many hosts
//! - [`ReportBuilder`] / [`ExecutionReport`]: aggregation of per-host outcomes
//! - [`Engine`]: expression resolution, escalation snapshot, dispatch and fold

pub mod outcome;
pub mod pool;
pub mod probe;
pub mod report;
pub mod session;

pub use outcome::{HostOutcome, OutcomeStatus, UnreachableReason, ESCALATION_FAILED_CODE};
pub use pool::{ExecutionPool, OutcomeStream, PoolConfig};
pub use probe::{NoProbe, Prober, TcpProber};
pub use report::{ExecutionReport, ReportBuilder, StoppedHost};
pub use session::{ExecutionUnit, ESCALATION_FAILURE_PATTERNS, STAGED_SCRIPT_MODE};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::Result;
use crate::escalation::{EscalationManager, EscalationMode, EscalationState};
use crate::inventory::{Host, InventoryResolver, StaleGroup};

/// One command to run against a host expression
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Host expression, e.g. `%web#eu,-web3`
    pub expression: String,
    /// Shell command or multi-line script
    pub command: String,
    /// Per-run escalation mode override
    pub mode_override: Option<EscalationMode>,
    /// Per-host command timeout
    pub timeout: Option<Duration>,
}

impl RunRequest {
    pub fn new(expression: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            command: command.into(),
            mode_override: None,
            timeout: None,
        }
    }

    pub fn with_mode(mut self, mode: Option<EscalationMode>) -> Self {
        self.mode_override = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Report of a run plus the inventory warnings raised while resolving it
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub report: ExecutionReport,
    pub stale: Vec<StaleGroup>,
}

/// Ties the resolver, the escalation state and the pool together
pub struct Engine {
    resolver: Arc<InventoryResolver>,
    escalation: Arc<EscalationManager>,
    pool: ExecutionPool,
}

impl Engine {
    pub fn new(
        resolver: Arc<InventoryResolver>,
        escalation: Arc<EscalationManager>,
        pool: ExecutionPool,
    ) -> Self {
        Self {
            resolver,
            escalation,
            pool,
        }
    }

    pub fn resolver(&self) -> &Arc<InventoryResolver> {
        &self.resolver
    }

    pub fn escalation(&self) -> &Arc<EscalationManager> {
        &self.escalation
    }

    pub fn pool(&self) -> &ExecutionPool {
        &self.pool
    }

    /// Resolve the request's expression and run its command on every host.
    pub async fn run(&self, request: &RunRequest, cancel: CancellationToken) -> Result<RunOutput> {
        self.run_observed(request, cancel, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `observe` for every outcome as it arrives.
    #[instrument(skip(self, request, cancel, observe), fields(expr = %request.expression))]
    pub async fn run_observed<F>(
        &self,
        request: &RunRequest,
        cancel: CancellationToken,
        observe: F,
    ) -> Result<RunOutput>
    where
        F: FnMut(&HostOutcome),
    {
        let snapshot = Arc::new(self.escalation.snapshot().with_override(request.mode_override));
        snapshot.validate()?;

        let resolution = self.resolver.resolve_expression(&request.expression).await?;

        let report = self
            .execute(
                resolution.hosts,
                &request.command,
                snapshot,
                request.timeout,
                cancel,
                observe,
            )
            .await;

        Ok(RunOutput {
            report,
            stale: resolution.stale,
        })
    }

    /// Dispatch to an already resolved host list and fold the outcomes.
    pub async fn execute<F>(
        &self,
        hosts: Vec<Host>,
        command: &str,
        snapshot: Arc<EscalationState>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
        mut observe: F,
    ) -> ExecutionReport
    where
        F: FnMut(&HostOutcome),
    {
        let mut builder = ReportBuilder::new();
        if hosts.is_empty() {
            info!("No hosts matched, nothing to run");
            return builder.finalize();
        }

        let mut outcomes = self.pool.dispatch(hosts, command, snapshot, timeout, cancel);
        while let Some(outcome) = outcomes.next().await {
            observe(&outcome);
            builder.fold(outcome);
        }

        let report = builder.finalize();
        info!(
            success = report.success.len(),
            error = report.error.len(),
            stopped = report.stopped,
            "Run complete"
        );
        report
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("resolver", &self.resolver)
            .field("pool", &self.pool)
            .finish()
    }
}
