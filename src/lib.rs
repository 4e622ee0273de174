//! # fleetexec - Run One Command Across a Fleet
//!
//! fleetexec dispatches a single shell command or script to many remote hosts
//! at once, keeps the number of open sessions bounded, optionally escalates
//! privileges on the remote side and folds the per-host results into one
//! report.
//!
//! ## Core Concepts
//!
//! - **Work groups**: named host sets served by an inventory service
//! - **Host expressions**: `%group`, `%group#tag`, literal hosts and `-exclusions`
//! - **Escalation**: `sudo` or `su` on the remote side, read through snapshots
//! - **Outcomes**: per-host exit code and output, or the reason it never finished
//! - **Reports**: success/error/stopped classification with output grouping
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        CLI / Engine                        │
//! └───────────────────────────────────────────────────────────┘
//!          │                     │                     │
//!          ▼                     ▼                     ▼
//! ┌─────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │    Inventory    │  │    Escalation    │  │  Execution Pool  │
//! │ (TTL cache +    │  │ (snapshots of    │  │ (semaphore-bound │
//! │  coalescing)    │  │  sudo/su state)  │  │  workers)        │
//! └─────────────────┘  └──────────────────┘  └──────────────────┘
//!                                                      │
//!                                 ┌────────────────────┤
//!                                 ▼                    ▼
//!                      ┌──────────────────┐  ┌──────────────────┐
//!                      │   Connections    │  │  Report Builder  │
//!                      │  (SSH, local)    │  │                  │
//!                      └──────────────────┘  └──────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use fleetexec::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load(None)?;
//!     let client = HttpInventoryClient::new("https://inventory.example.com", config.lookup_timeout())?;
//!     let cache = InventoryCache::new(config.cache_config());
//!     let resolver = InventoryResolver::new(Arc::new(client), Arc::new(cache));
//!
//!     let connector = ConnectionFactory::new(config.connection_config());
//!     let pool = ExecutionPool::new(Arc::new(connector), config.pool_config())?;
//!     let escalation = EscalationManager::from_state(config.escalation_state()?);
//!
//!     let engine = Engine::new(Arc::new(resolver), Arc::new(escalation), pool);
//!     let output = engine
//!         .run(&RunRequest::new("%web", "uptime"), CancellationToken::new())
//!         .await?;
//!     println!("{}", output.report.summary());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::config::Config;
    pub use crate::connection::{Connection, ConnectionFactory, Connector};
    pub use crate::error::{Error, Result};
    pub use crate::escalation::{EscalationManager, EscalationMode, EscalationState, Secret};
    pub use crate::executor::{
        Engine, ExecutionPool, ExecutionReport, HostOutcome, PoolConfig, ReportBuilder,
        RunOutput, RunRequest,
    };
    pub use crate::inventory::{
        Host, HostExpression, HttpInventoryClient, InventoryCache, InventoryCacheConfig,
        InventoryClient, InventoryResolver,
    };
    pub use tokio_util::sync::CancellationToken;
}

/// Error types and the crate-wide `Result` alias.
pub mod error;

/// Layered configuration.
pub mod config;

/// Transport to target hosts.
///
/// Supports:
/// - SSH via russh
/// - Local process execution
pub mod connection;

/// Remote user and privilege escalation state.
pub mod escalation;

/// Work-group resolution, host expressions and the inventory cache.
pub mod inventory;

/// Bounded dispatch, per-host outcomes and run reports.
pub mod executor;

pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
