//! Aggregation of per-host outcomes into a run report.

use indexmap::IndexMap;
use serde::Serialize;

use super::outcome::{HostOutcome, OutcomeStatus};

/// Consolidated result of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Exit code of every completed host
    pub codes: IndexMap<String, i32>,
    /// Hosts that exited 0
    pub success: Vec<String>,
    /// Hosts that exited non-zero or failed escalation
    pub error: Vec<String>,
    /// Number of hosts that never completed
    pub stopped: usize,
    /// Hosts that never completed, with the reason
    pub stopped_hosts: Vec<StoppedHost>,
    /// Hosts grouped by identical output
    pub outputs: IndexMap<String, Vec<String>>,
}

/// A host counted as stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoppedHost {
    pub host: String,
    pub reason: String,
}

impl ExecutionReport {
    /// Hosts processed, i.e. success plus error
    pub fn total(&self) -> usize {
        self.success.len() + self.error.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Hosts processed: {}, success: {}, error: {}",
            self.total(),
            self.success.len(),
            self.error.len()
        )
    }

    /// No errors and nothing stopped
    pub fn is_success(&self) -> bool {
        self.error.is_empty() && self.stopped == 0
    }

    /// Process exit code: 0 all good, 1 any error, 2 only stopped hosts
    pub fn exit_code(&self) -> i32 {
        if !self.error.is_empty() {
            1
        } else if self.stopped > 0 {
            2
        } else {
            0
        }
    }
}

/// Single-writer fold over an outcome stream
#[derive(Debug, Default)]
pub struct ReportBuilder {
    report: ExecutionReport,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one outcome.
    pub fn fold(&mut self, outcome: HostOutcome) {
        let host = outcome.host.name();
        let (code, succeeded) = match &outcome.status {
            OutcomeStatus::Exited { code } => (*code, *code == 0),
            OutcomeStatus::EscalationFailed { code } => (*code, false),
            OutcomeStatus::Unreachable { reason } => {
                self.report.stopped += 1;
                self.report.stopped_hosts.push(StoppedHost {
                    host,
                    reason: reason.to_string(),
                });
                return;
            }
        };

        self.report.codes.insert(host.clone(), code);
        if succeeded {
            self.report.success.push(host.clone());
        } else {
            self.report.error.push(host.clone());
        }
        self.report
            .outputs
            .entry(outcome.output)
            .or_default()
            .push(host);
    }

    /// Outcomes folded so far
    pub fn seen(&self) -> usize {
        self.report.total() + self.report.stopped
    }

    pub fn finalize(self) -> ExecutionReport {
        self.report
    }
}
