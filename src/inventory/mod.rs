//! Inventory resolution for fleetexec.
//!
//! Turns host expressions and symbolic work-group names into concrete
//! [`Host`] lists. Work groups come from an inventory service through the
//! [`InventoryClient`] seam and are kept in a TTL cache that is persisted to
//! disk, so the tool keeps working from the last known membership when the
//! service is down.
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetexec::inventory::{HttpInventoryClient, InventoryCache, InventoryCacheConfig, InventoryResolver};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = HttpInventoryClient::new("https://inventory.example.com", Duration::from_secs(10))?;
//! let cache = InventoryCache::new(InventoryCacheConfig::default().with_persistence("/var/cache/fleetexec"));
//! let resolver = InventoryResolver::new(Arc::new(client), Arc::new(cache));
//!
//! let resolution = resolver.resolve_expression("%web#eu,-web3.example.com").await?;
//! for warning in &resolution.stale {
//!     eprintln!("warning: {}", warning);
//! }
//! ```

pub mod cache;
pub mod client;
pub mod expr;
pub mod host;
pub mod resolver;

pub use cache::{InventoryCache, InventoryCacheConfig, WorkGroup, DEFAULT_TTL};
pub use client::{HttpInventoryClient, InventoryClient, LookupError, DEFAULT_LOOKUP_TIMEOUT};
pub use expr::{HostExpression, Selector, Term};
pub use host::{Host, HostParseError};
pub use resolver::{InventoryResolver, Resolution, StaleGroup};
