//! Cache command - manage the on-disk work-group cache

use super::CommandContext;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetexec::inventory::InventoryCache;

/// Arguments for the cache command
#[derive(Parser, Debug, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache actions
#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Delete every persisted work group
    Clear,
    /// Print the cache directory
    Path,
}

impl CacheArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let cache_dir = ctx.config.cache_dir();
        match self.action {
            CacheAction::Clear => {
                let removed = InventoryCache::purge_dir(&cache_dir)
                    .await
                    .with_context(|| format!("Failed to clear cache: {}", cache_dir.display()))?;
                if ctx.output.is_json() {
                    println!("{}", serde_json::json!({ "removed": removed }));
                } else {
                    println!("Removed {} cached work groups from {}", removed, cache_dir.display());
                }
            }
            CacheAction::Path => println!("{}", cache_dir.display()),
        }
        Ok(0)
    }
}
