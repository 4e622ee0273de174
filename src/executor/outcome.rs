//! Per-host execution outcomes.

use serde::Serialize;
use std::fmt;

use crate::inventory::Host;

/// Exit code recorded for hosts whose escalation handshake was rejected
pub const ESCALATION_FAILED_CODE: i32 = -1;

/// Why a host never completed the command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum UnreachableReason {
    /// Every reachability probe failed
    ProbeFailed,
    /// The session could not be opened
    ConnectFailed(String),
    /// The login was rejected
    AuthFailed(String),
    /// The per-command timeout elapsed
    TimedOut,
    /// The run was cancelled before the host finished
    Cancelled,
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableReason::ProbeFailed => f.write_str("probe failed"),
            UnreachableReason::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            UnreachableReason::AuthFailed(msg) => write!(f, "authentication failed: {}", msg),
            UnreachableReason::TimedOut => f.write_str("timed out"),
            UnreachableReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Terminal status of one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The command ran to completion
    Exited { code: i32 },
    /// sudo/su rejected the escalation
    EscalationFailed { code: i32 },
    /// The host never completed the command
    Unreachable { reason: UnreachableReason },
}

/// Result of executing one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostOutcome {
    /// Target host
    pub host: Host,
    /// Terminal status
    #[serde(flatten)]
    pub status: OutcomeStatus,
    /// Combined stdout and stderr
    pub output: String,
}

impl HostOutcome {
    /// The command finished with `code`
    pub fn exited(host: Host, code: i32, output: impl Into<String>) -> Self {
        Self {
            host,
            status: OutcomeStatus::Exited { code },
            output: output.into(),
        }
    }

    /// The escalation handshake failed
    pub fn escalation_failed(host: Host, output: impl Into<String>) -> Self {
        Self {
            host,
            status: OutcomeStatus::EscalationFailed {
                code: ESCALATION_FAILED_CODE,
            },
            output: output.into(),
        }
    }

    /// The host never completed
    pub fn unreachable(host: Host, reason: UnreachableReason) -> Self {
        Self {
            host,
            status: OutcomeStatus::Unreachable { reason },
            output: String::new(),
        }
    }

    /// Exit code recorded in the report, if any
    pub fn code(&self) -> Option<i32> {
        match self.status {
            OutcomeStatus::Exited { code } | OutcomeStatus::EscalationFailed { code } => {
                Some(code)
            }
            OutcomeStatus::Unreachable { .. } => None,
        }
    }

    /// Whether the host was stopped before completing
    pub fn is_unreachable(&self) -> bool {
        matches!(self.status, OutcomeStatus::Unreachable { .. })
    }
}
