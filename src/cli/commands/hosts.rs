//! Hosts command - resolve a host expression without running anything

use super::CommandContext;
use anyhow::Result;
use clap::Parser;

/// Arguments for the hosts command
#[derive(Parser, Debug, Clone)]
pub struct HostsArgs {
    /// Host expression; lists the configured default work groups when omitted
    pub expression: Option<String>,
}

impl HostsArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let resolver = ctx.resolver()?;

        let resolution = match &self.expression {
            Some(expr) => resolver.resolve_expression(expr).await?,
            None => {
                if ctx.config.inventory.work_groups.is_empty() {
                    ctx.output
                        .error("No host expression given and inventory.work_groups is empty");
                    return Ok(1);
                }
                resolver.preload_defaults().await?
            }
        };

        ctx.output.stale_groups(&resolution.stale);
        ctx.output.hosts(&resolution.hosts);
        ctx.output
            .info(&format!("Cache: {}", resolver.cache().stats()));
        Ok(0)
    }
}
