//! Subcommands module for fleetexec CLI
//!
//! This module contains all the subcommand implementations.

pub mod cache;
pub mod exec;
pub mod hosts;

use crate::cli::output::OutputFormatter;
use crate::cli::{Cli, DispatchOptions};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fleetexec::config::{Config, RunMode};
use fleetexec::connection::ConnectionFactory;
use fleetexec::escalation::{EscalationManager, EscalationMode};
use fleetexec::executor::{Engine, ExecutionPool};
use fleetexec::inventory::{
    Host, HttpInventoryClient, InventoryCache, InventoryClient, InventoryResolver, LookupError,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zeroize::Zeroizing;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Verbosity level
    pub verbosity: u8,
    /// Cancelled on Ctrl-C
    pub cancel: CancellationToken,
}

/// Inventory client used when no service URL is configured.
///
/// Literal hosts and previously cached groups still resolve.
struct NoInventoryService;

#[async_trait]
impl InventoryClient for NoInventoryService {
    async fn fetch(&self, _group: &str) -> std::result::Result<Vec<Host>, LookupError> {
        Err(LookupError::Http(
            "inventory.url is not configured".to_string(),
        ))
    }
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &Cli, config: Config, cancel: CancellationToken) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());

        Self {
            config,
            output,
            verbosity: cli.verbosity(),
            cancel,
        }
    }

    /// Build the inventory resolver from the configuration
    pub fn resolver(&self) -> Result<InventoryResolver> {
        let client: Arc<dyn InventoryClient> = match &self.config.inventory.url {
            Some(url) => Arc::new(HttpInventoryClient::new(url, self.config.lookup_timeout())?),
            None => {
                debug!("No inventory url configured");
                Arc::new(NoInventoryService)
            }
        };
        let cache = InventoryCache::new(self.config.cache_config());

        Ok(InventoryResolver::new(client, Arc::new(cache))
            .with_default_groups(self.config.inventory.work_groups.clone()))
    }

    /// Result display, `--mode` first
    pub fn run_mode(&self, options: &DispatchOptions) -> Result<RunMode> {
        let mode = match &options.mode {
            Some(mode) => mode.parse::<RunMode>()?,
            None => self.config.run_mode()?,
        };
        Ok(mode)
    }

    /// Build an engine with command-line options layered over the config
    pub fn engine(&self, options: &DispatchOptions) -> Result<Engine> {
        let mut config = self.config.clone();
        if let Some(user) = &options.user {
            config.main.user = Some(user.clone());
        }
        if let Some(raise_user) = &options.raise_user {
            config.main.raise_user = raise_user.clone();
        }
        if let Some(threads) = options.threads {
            config.executor.ssh_threads = threads;
        }
        if self.run_mode(options)? == RunMode::Serial {
            config.executor.ssh_threads = 1;
        }
        if options.no_probe {
            config.executor.ping_count = 0;
        }
        config.validate()?;

        let state = config.escalation_state()?;
        let mode = state.with_override(options.mode_override()).mode;
        let escalation = EscalationManager::from_state(state);
        if options.ask_pass || mode == EscalationMode::Su {
            let password = Zeroizing::new(
                dialoguer::Password::new()
                    .with_prompt(format!("{} password", mode))
                    .allow_empty_password(true)
                    .interact()
                    .context("Failed to read escalation password")?,
            );
            escalation.set_secret(password.as_str());
        }

        let connector = ConnectionFactory::new(config.connection_config());
        let pool = ExecutionPool::new(Arc::new(connector), config.pool_config())?;

        Ok(Engine::new(
            Arc::new(self.resolver()?),
            Arc::new(escalation),
            pool,
        ))
    }
}
