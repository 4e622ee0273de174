//! Work-group resolution with caching and request coalescing.
//!
//! For every requested group the resolver:
//!
//! 1. serves the cached entry if it is younger than the TTL;
//! 2. otherwise joins (or starts) the single in-flight lookup for that group;
//! 3. on lookup failure falls back to the cached entry, however old, and
//!    reports it as a [`StaleGroup`];
//! 4. fails with [`Error::InventoryUnavailable`] only when there is nothing
//!    cached at all.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::{InventoryCache, WorkGroup};
use super::client::{InventoryClient, LookupError};
use super::expr::HostExpression;
use super::host::Host;
use crate::error::{Error, Result};

type SharedLookup = Shared<BoxFuture<'static, std::result::Result<Arc<WorkGroup>, LookupError>>>;

/// A group answered from an outdated cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleGroup {
    /// Work-group name
    pub group: String,
    /// When the served entry was fetched
    pub fetched_at: DateTime<Utc>,
    /// Why the refresh failed
    pub reason: String,
}

impl std::fmt::Display for StaleGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "work group '{}' served from cache fetched at {} ({})",
            self.group,
            self.fetched_at.to_rfc3339(),
            self.reason
        )
    }
}

/// Outcome of a resolution
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    /// Deduplicated hosts in first-seen order
    pub hosts: Vec<Host>,
    /// Groups that were served stale
    pub stale: Vec<StaleGroup>,
}

impl Resolution {
    /// Whether every group was fresh
    pub fn is_fresh(&self) -> bool {
        self.stale.is_empty()
    }
}

/// Resolves work-group names to hosts
pub struct InventoryResolver {
    client: Arc<dyn InventoryClient>,
    cache: Arc<InventoryCache>,
    in_flight: Arc<Mutex<HashMap<String, SharedLookup>>>,
    default_groups: Vec<String>,
}

impl InventoryResolver {
    /// Create a resolver over a client and cache
    pub fn new(client: Arc<dyn InventoryClient>, cache: Arc<InventoryCache>) -> Self {
        Self {
            client,
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            default_groups: Vec::new(),
        }
    }

    /// Groups warmed by [`preload_defaults`](Self::preload_defaults)
    pub fn with_default_groups(mut self, groups: Vec<String>) -> Self {
        self.default_groups = groups;
        self
    }

    /// The underlying cache
    pub fn cache(&self) -> &Arc<InventoryCache> {
        &self.cache
    }

    /// Resolve groups to a flat, deduplicated host list.
    pub async fn resolve(&self, groups: &[String]) -> Result<Resolution> {
        let (entries, stale) = self.resolve_groups(groups).await?;
        let hosts: IndexSet<Host> = entries
            .iter()
            .flat_map(|entry| entry.hosts.iter().cloned())
            .collect();

        Ok(Resolution {
            hosts: hosts.into_iter().collect(),
            stale,
        })
    }

    /// Parse a host expression and resolve it.
    pub async fn resolve_expression(&self, expr: &str) -> Result<Resolution> {
        let expression = HostExpression::parse(expr)?;
        let (entries, stale) = self.resolve_groups(&expression.groups()).await?;
        let group_hosts: Vec<Host> = entries
            .iter()
            .flat_map(|entry| entry.hosts.iter().cloned())
            .collect();

        let hosts = expression.select(&group_hosts);
        debug!(expr = %expr, host_count = hosts.len(), "Resolved host expression");
        Ok(Resolution { hosts, stale })
    }

    /// Warm the cache with the configured default groups.
    pub async fn preload_defaults(&self) -> Result<Resolution> {
        if self.default_groups.is_empty() {
            return Ok(Resolution::default());
        }
        info!(groups = ?self.default_groups, "Preloading default work groups");
        self.resolve(&self.default_groups).await
    }

    async fn resolve_groups(
        &self,
        groups: &[String],
    ) -> Result<(Vec<Arc<WorkGroup>>, Vec<StaleGroup>)> {
        let unique: IndexSet<&String> = groups.iter().collect();
        let results =
            futures::future::join_all(unique.into_iter().map(|g| self.resolve_group(g))).await;

        let mut entries = Vec::with_capacity(results.len());
        let mut stale = Vec::new();
        for result in results {
            let (entry, warning) = result?;
            entries.push(entry);
            stale.extend(warning);
        }
        Ok((entries, stale))
    }

    async fn resolve_group(&self, group: &str) -> Result<(Arc<WorkGroup>, Option<StaleGroup>)> {
        let cached = self.cache.get(group).await;
        if let Some(entry) = cached.as_ref().filter(|e| !self.cache.is_expired(e)) {
            return Ok((Arc::clone(entry), None));
        }

        match self.lookup(group).await {
            Ok(entry) => Ok((entry, None)),
            Err(e) => match cached {
                Some(entry) => {
                    let warning = StaleGroup {
                        group: group.to_string(),
                        fetched_at: entry.fetched_at,
                        reason: e.to_string(),
                    };
                    warn!(
                        group = %group,
                        fetched_at = %entry.fetched_at.to_rfc3339(),
                        error = %e,
                        "Inventory refresh failed, serving stale work group"
                    );
                    Ok((entry, Some(warning)))
                }
                None => Err(Error::inventory_unavailable(group, e.to_string())),
            },
        }
    }

    /// Join the in-flight lookup for `group`, starting one if needed.
    async fn lookup(&self, group: &str) -> std::result::Result<Arc<WorkGroup>, LookupError> {
        let shared = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(group) {
                Some(existing) => {
                    debug!(group = %group, "Joining in-flight inventory lookup");
                    existing.clone()
                }
                None => {
                    let shared = self.start_lookup(group);
                    in_flight.insert(group.to_string(), shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    fn start_lookup(&self, group: &str) -> SharedLookup {
        let client = Arc::clone(&self.client);
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);
        let group = group.to_string();

        async move {
            // A lookup that finished just before this one started already
            // refreshed the entry.
            let result = match cache.get(&group).await.filter(|e| !cache.is_expired(e)) {
                Some(fresh) => Ok(fresh),
                None => match client.fetch(&group).await {
                    Ok(hosts) => {
                        let hosts = hosts.into_iter().map(|h| h.with_group(&group)).collect();
                        let entry = cache.insert(WorkGroup::new(&group, hosts)).await;
                        info!(group = %group, host_count = entry.hosts.len(), "Refreshed work group");
                        Ok(entry)
                    }
                    Err(e) => Err(e),
                },
            };
            in_flight.lock().remove(&group);
            result
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for InventoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryResolver")
            .field("cache", &self.cache)
            .field("in_flight", &self.in_flight.lock().len())
            .field("default_groups", &self.default_groups)
            .finish()
    }
}
