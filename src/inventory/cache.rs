//! Work-group cache with TTL and disk persistence.
//!
//! Entries are keyed by work-group name and carry the wall-clock time they
//! were fetched. The cache never drops an entry because it expired: the
//! resolver decides whether to refresh, and keeps serving the old entry if
//! the refresh fails.
//!
//! With persistence enabled every insert is written through to
//! `<cache_dir>/<sanitized-group>.json`, and a memory miss falls back to that
//! file, so a fresh process starts warm.
//!
//! # Example
//!
//! ```rust
//! use fleetexec::inventory::cache::{InventoryCache, InventoryCacheConfig, WorkGroup};
//! use fleetexec::inventory::Host;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cache = InventoryCache::new(InventoryCacheConfig::default().with_ttl(Duration::from_secs(60)));
//! cache.insert(WorkGroup::new("web", vec![Host::new("web1")])).await;
//!
//! let entry = cache.get("web").await.unwrap();
//! assert!(!cache.is_expired(&entry));
//! # });
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::host::Host;

/// Default time-to-live for work groups (24 hours)
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Cache Configuration
// ============================================================================

/// Configuration for the inventory cache
#[derive(Debug, Clone)]
pub struct InventoryCacheConfig {
    /// Age after which an entry must be refreshed
    pub ttl: Duration,
    /// Directory for persisted entries, `None` keeps everything in memory
    pub cache_dir: Option<PathBuf>,
}

impl Default for InventoryCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            cache_dir: None,
        }
    }
}

impl InventoryCacheConfig {
    /// Set the entry TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enable persistent storage at the specified directory
    pub fn with_persistence(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }
}

// ============================================================================
// Cache Entry
// ============================================================================

/// A resolved work group and the time it was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkGroup {
    /// Work-group name
    #[serde(rename = "group")]
    pub name: String,
    /// When the inventory service returned this list
    pub fetched_at: DateTime<Utc>,
    /// Member hosts
    pub hosts: Vec<Host>,
}

impl WorkGroup {
    /// A group fetched just now
    pub fn new(name: impl Into<String>, hosts: Vec<Host>) -> Self {
        Self::fetched_at(name, hosts, Utc::now())
    }

    /// A group with an explicit fetch time
    pub fn fetched_at(name: impl Into<String>, hosts: Vec<Host>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            fetched_at,
            hosts,
        }
    }

    /// Time since the group was fetched
    pub fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the entry is at least `ttl` old
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}

// ============================================================================
// Cache Metrics
// ============================================================================

/// Counters for monitoring cache behaviour
#[derive(Debug, Default)]
pub struct InventoryCacheMetrics {
    /// Lookups answered from memory
    pub hits: AtomicU64,
    /// Lookups answered from disk
    pub disk_loads: AtomicU64,
    /// Lookups with no entry at all
    pub misses: AtomicU64,
    /// Entries written
    pub inserts: AtomicU64,
}

impl InventoryCacheMetrics {
    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            disk_loads: self.disk_loads.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Lookups answered from memory
    pub hits: u64,
    /// Lookups answered from disk
    pub disk_loads: u64,
    /// Lookups with no entry at all
    pub misses: u64,
    /// Entries written
    pub inserts: u64,
}

impl std::fmt::Display for CacheStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Hits: {}, Disk loads: {}, Misses: {}, Inserts: {}",
            self.hits, self.disk_loads, self.misses, self.inserts
        )
    }
}

// ============================================================================
// Inventory Cache
// ============================================================================

/// Thread-safe work-group cache
pub struct InventoryCache {
    entries: RwLock<HashMap<String, Arc<WorkGroup>>>,
    config: InventoryCacheConfig,
    metrics: InventoryCacheMetrics,
}

impl InventoryCache {
    /// Create a new cache with the given configuration
    pub fn new(config: InventoryCacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            metrics: InventoryCacheMetrics::default(),
        }
    }

    /// Cache configuration
    pub fn config(&self) -> &InventoryCacheConfig {
        &self.config
    }

    /// Whether an entry is due for refresh under this cache's TTL
    pub fn is_expired(&self, entry: &WorkGroup) -> bool {
        entry.is_expired(self.config.ttl)
    }

    /// Latest entry for a group, fresh or not.
    pub async fn get(&self, group: &str) -> Option<Arc<WorkGroup>> {
        if let Some(entry) = self.entries.read().await.get(group) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(entry));
        }

        let loaded = match &self.config.cache_dir {
            Some(cache_dir) => Self::load_entry(cache_dir, group).await,
            None => None,
        };

        match loaded {
            Some(entry) => {
                self.metrics.disk_loads.fetch_add(1, Ordering::Relaxed);
                let entry = Arc::new(entry);
                // Keep a concurrent insert if one won the race
                let mut entries = self.entries.write().await;
                Some(Arc::clone(
                    entries.entry(group.to_string()).or_insert(entry),
                ))
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a freshly fetched group, replacing any older entry
    pub async fn insert(&self, group: WorkGroup) -> Arc<WorkGroup> {
        let entry = Arc::new(group);
        self.entries
            .write()
            .await
            .insert(entry.name.clone(), Arc::clone(&entry));
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);

        if let Some(cache_dir) = &self.config.cache_dir {
            if let Err(e) = Self::persist_entry(cache_dir, &entry).await {
                warn!(group = %entry.name, error = %e, "Failed to persist work group cache");
            }
        }

        entry
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.metrics.snapshot()
    }

    /// Remove every persisted entry under `cache_dir`, returning how many
    /// files were deleted.
    pub async fn purge_dir(cache_dir: &Path) -> std::io::Result<usize> {
        let mut read_dir = match tokio::fs::read_dir(cache_dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            } else if name.contains(".json.") && name.ends_with(".tmp") {
                // Left behind by an interrupted write
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(removed)
    }

    /// File holding a group's persisted entry. Percent-encoding keeps
    /// distinct group names on distinct files.
    pub fn entry_path(cache_dir: &Path, group: &str) -> PathBuf {
        cache_dir.join(format!("{}.json", urlencoding::encode(group)))
    }

    async fn persist_entry(cache_dir: &Path, entry: &WorkGroup) -> std::io::Result<()> {
        tokio::fs::create_dir_all(cache_dir).await?;
        let json = serde_json::to_string_pretty(entry)?;

        // Write then rename so readers never see a partial file
        let path = Self::entry_path(cache_dir, &entry.name);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await
    }

    async fn load_entry(cache_dir: &Path, group: &str) -> Option<WorkGroup> {
        let path = Self::entry_path(cache_dir, group);
        let content = tokio::fs::read_to_string(&path).await.ok()?;

        match serde_json::from_str::<WorkGroup>(&content) {
            Ok(entry) if entry.name == group => {
                debug!(group = %group, age_secs = %entry.age().as_secs(), "Loaded work group from disk cache");
                Some(entry)
            }
            Ok(entry) => {
                warn!(group = %group, found = %entry.name, path = %path.display(), "Disk cache entry belongs to another group");
                None
            }
            Err(e) => {
                warn!(group = %group, error = %e, path = %path.display(), "Ignoring corrupt disk cache entry");
                None
            }
        }
    }
}

impl Default for InventoryCache {
    fn default() -> Self {
        Self::new(InventoryCacheConfig::default())
    }
}

impl std::fmt::Debug for InventoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryCache")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<Host> {
        vec![Host::new("web1").with_group("web"), Host::new("web2").with_group("web")]
    }

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let cache = InventoryCache::default();
        assert!(cache.get("web").await.is_none());

        cache.insert(WorkGroup::new("web", hosts())).await;
        let entry = cache.get("web").await.unwrap();
        assert_eq!(entry.hosts.len(), 2);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.inserts, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_still_returned() {
        let cache = InventoryCache::new(InventoryCacheConfig::default().with_ttl(Duration::from_secs(60)));
        let old = Utc::now() - chrono::Duration::seconds(120);
        cache.insert(WorkGroup::fetched_at("web", hosts(), old)).await;

        let entry = cache.get("web").await.unwrap();
        assert!(cache.is_expired(&entry));
    }

    #[test]
    fn test_ttl_boundary_is_expired() {
        let entry = WorkGroup::new("web", hosts());
        assert!(entry.is_expired(Duration::ZERO));
        assert!(!entry.is_expired(DEFAULT_TTL));
    }

    #[tokio::test]
    async fn test_persisted_entry_survives_new_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = InventoryCacheConfig::default().with_persistence(dir.path());

        let first = InventoryCache::new(config.clone());
        first.insert(WorkGroup::new("web/prod", hosts())).await;
        assert!(InventoryCache::entry_path(dir.path(), "web/prod").exists());

        let second = InventoryCache::new(config);
        let entry = second.get("web/prod").await.unwrap();
        assert_eq!(entry.name, "web/prod");
        assert_eq!(entry.hosts, hosts());
        assert_eq!(second.stats().disk_loads, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(InventoryCache::entry_path(dir.path(), "web"), "{not json").unwrap();

        let cache = InventoryCache::new(InventoryCacheConfig::default().with_persistence(dir.path()));
        assert!(cache.get("web").await.is_none());
    }

    #[tokio::test]
    async fn test_purge_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InventoryCache::new(InventoryCacheConfig::default().with_persistence(dir.path()));
        cache.insert(WorkGroup::new("web", hosts())).await;
        cache.insert(WorkGroup::new("db", hosts())).await;

        let leftover = dir.path().join("web.json.5f0c6a1e.tmp");
        std::fs::write(&leftover, "{").unwrap();

        assert_eq!(InventoryCache::purge_dir(dir.path()).await.unwrap(), 2);
        assert!(!leftover.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(InventoryCache::purge_dir(&dir.path().join("missing")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_similar_group_names_use_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let dotted = InventoryCache::entry_path(dir.path(), "a.b");
        let underscored = InventoryCache::entry_path(dir.path(), "a_b");
        assert_ne!(dotted, underscored);
        assert_eq!(dotted.parent(), Some(dir.path()));
        assert_eq!(
            InventoryCache::entry_path(dir.path(), "web/prod").parent(),
            Some(dir.path())
        );

        let config = InventoryCacheConfig::default().with_persistence(dir.path());
        let cache = InventoryCache::new(config.clone());
        cache.insert(WorkGroup::new("a.b", hosts())).await;
        cache.insert(WorkGroup::new("a_b", vec![Host::new("other")])).await;

        let reloaded = InventoryCache::new(config);
        assert_eq!(reloaded.get("a.b").await.unwrap().hosts, hosts());
        assert_eq!(reloaded.get("a_b").await.unwrap().hosts, vec![Host::new("other")]);
        assert_eq!(reloaded.stats().disk_loads, 2);
    }
}
