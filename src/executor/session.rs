//! Execution of a single (host, command) unit.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::outcome::{HostOutcome, UnreachableReason};
use super::probe::Prober;
use crate::connection::{
    CommandResult, Connection, ConnectionError, Connector, ExecuteOptions, TransferOptions,
};
use crate::escalation::{EscalationMode, EscalationState};
use crate::inventory::Host;

/// Messages sudo and su print when they reject the escalation
pub const ESCALATION_FAILURE_PATTERNS: &[&str] = &[
    "incorrect password",
    "Sorry, try again",
    "Authentication failure",
    "a password is required",
    "not in the sudoers file",
];

/// Staged scripts run as `sh <path>`, so the escalation target only needs
/// read access; it is usually not the login user who owns the file.
pub const STAGED_SCRIPT_MODE: u32 = 0o644;

/// One host, the command for it and the escalation snapshot it runs under
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub host: Host,
    pub command: Arc<str>,
    pub snapshot: Arc<EscalationState>,
}

/// Whether `result` shows that sudo/su refused the escalation
pub fn escalation_failed(mode: EscalationMode, result: &CommandResult) -> bool {
    if mode.is_none() || result.success {
        return false;
    }
    ESCALATION_FAILURE_PATTERNS
        .iter()
        .any(|p| result.stdout.contains(p) || result.stderr.contains(p))
}

/// Runs one unit and keeps hold of the open connection so the pool can
/// close it from outside when the run is cancelled or times out.
pub(crate) struct Session {
    unit: ExecutionUnit,
    connector: Arc<dyn Connector>,
    prober: Arc<dyn Prober>,
    remote_tmpdir: PathBuf,
    connection: Mutex<Option<Arc<dyn Connection>>>,
}

impl Session {
    pub(crate) fn new(
        unit: ExecutionUnit,
        connector: Arc<dyn Connector>,
        prober: Arc<dyn Prober>,
        remote_tmpdir: PathBuf,
    ) -> Self {
        Self {
            unit,
            connector,
            prober,
            remote_tmpdir,
            connection: Mutex::new(None),
        }
    }

    pub(crate) fn host(&self) -> &Host {
        &self.unit.host
    }

    #[instrument(skip(self), fields(host = %self.unit.host))]
    pub(crate) async fn run(&self) -> HostOutcome {
        let host = self.unit.host.clone();

        if !self.prober.probe(&host).await {
            return HostOutcome::unreachable(host, UnreachableReason::ProbeFailed);
        }

        let snapshot = Arc::clone(&self.unit.snapshot);
        let connection = match self.connector.connect(&host, &snapshot.user).await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(error = %e, "Failed to open session");
                let reason = if e.is_auth_failure() {
                    UnreachableReason::AuthFailed(e.to_string())
                } else {
                    UnreachableReason::ConnectFailed(e.to_string())
                };
                return HostOutcome::unreachable(host, reason);
            }
        };
        *self.connection.lock() = Some(Arc::clone(&connection));

        let outcome = match self.execute(connection.as_ref(), &snapshot).await {
            Ok(result) if escalation_failed(snapshot.mode, &result) => {
                warn!(mode = %snapshot.mode, "Escalation rejected");
                HostOutcome::escalation_failed(host, result.combined_output())
            }
            Ok(result) => {
                trace!(exit_code = result.exit_code, "Command finished");
                HostOutcome::exited(host, result.exit_code, result.combined_output())
            }
            Err(e) => {
                debug!(error = %e, "Command execution failed");
                HostOutcome::unreachable(host, UnreachableReason::ConnectFailed(e.to_string()))
            }
        };

        self.close().await;
        outcome
    }

    async fn execute(
        &self,
        connection: &dyn Connection,
        snapshot: &EscalationState,
    ) -> Result<CommandResult, ConnectionError> {
        let mut options = None;
        if !snapshot.mode.is_none() {
            let mut opts = ExecuteOptions::new().with_escalation(
                snapshot.mode,
                snapshot.target_user.clone(),
                snapshot.secret().cloned(),
            );
            if snapshot.mode == EscalationMode::Su {
                opts = opts.with_pty();
            }
            options = Some(opts);
        }

        let command = self.unit.command.as_ref();
        if !(snapshot.mode.requires_script() || command.contains('\n')) {
            return connection.execute(command, options).await;
        }

        let script = self
            .remote_tmpdir
            .join(format!("fleetexec-{}.sh", Uuid::new_v4()));
        connection
            .upload_content(
                command.as_bytes(),
                &script,
                Some(TransferOptions::new().with_mode(STAGED_SCRIPT_MODE)),
            )
            .await?;
        let script_arg = shell_words::quote(&script.to_string_lossy()).into_owned();
        debug!(script = %script.display(), "Staged command script");

        let result = connection
            .execute(&format!("sh {}", script_arg), options)
            .await;

        if let Err(e) = connection
            .execute(&format!("rm -f {}", script_arg), None)
            .await
        {
            warn!(script = %script.display(), error = %e, "Failed to remove staged script");
        }
        result
    }

    /// Close the session if one is open.
    pub(crate) async fn close(&self) {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                trace!(host = %self.unit.host, error = %e, "Error closing session");
            }
        }
    }

    /// Close the session, giving up after `grace`.
    pub(crate) async fn abort(&self, grace: Duration) {
        if tokio::time::timeout(grace, self.close()).await.is_err() {
            warn!(host = %self.unit.host, "Session did not close within the grace period");
        }
    }
}
