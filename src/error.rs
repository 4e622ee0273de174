//! Error types for fleetexec.
//!
//! Only run-scoping failures live here. Anything that goes wrong on a single
//! host (unreachable, bad escalation secret, nonzero exit) is folded into the
//! report as a [`HostOutcome`](crate::executor::HostOutcome) and never
//! surfaces as an `Err`.

use thiserror::Error;

use crate::connection::ConnectionError;

/// Result type alias for fleetexec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for fleetexec.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Inventory Errors
    // ========================================================================
    /// The inventory service could not resolve a group and nothing was cached.
    #[error("Inventory unavailable for work group '{group}': {reason}")]
    InventoryUnavailable {
        /// Work group that failed to resolve
        group: String,
        /// Why the lookup failed
        reason: String,
    },

    /// A host expression could not be parsed.
    #[error("Invalid host expression '{expr}': {message}")]
    InvalidExpression {
        /// The offending expression
        expr: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration or escalation state is unusable for a dispatch.
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport failure outside of a per-host dispatch.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new inventory unavailable error.
    pub fn inventory_unavailable(group: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InventoryUnavailable {
            group: group.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new invalid expression error.
    pub fn invalid_expression(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expr: expr.into(),
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(message.into())
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InventoryUnavailable { .. } => 5,
            Error::InvalidExpression { .. } | Error::ConfigurationInvalid(_) => 4,
            Error::Connection(_) => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::inventory_unavailable("web", "timeout").exit_code(), 5);
        assert_eq!(Error::config("workers must be positive").exit_code(), 4);
        assert_eq!(Error::Internal("boom".into()).exit_code(), 1);
    }

    #[test]
    fn test_display() {
        let err = Error::inventory_unavailable("web", "connection refused");
        assert_eq!(
            err.to_string(),
            "Inventory unavailable for work group 'web': connection refused"
        );
    }
}
