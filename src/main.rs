//! fleetexec - run one shell command across a fleet of hosts
//!
//! This is the main entry point for the fleetexec CLI.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use fleetexec::config::Config;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    init_logging(cli.verbosity());
    if cli.verbosity() >= 2 {
        eprintln!("fleetexec v{}", VERSION);
    }

    let exit_code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            let code = e
                .downcast_ref::<fleetexec::Error>()
                .map_or(1, fleetexec::Error::exit_code);
            eprintln!("Error: {:#}", e);
            code
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: &Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let mut ctx = CommandContext::new(cli, config, cancel);
    info!(command = ?cli.command, "Starting");

    match &cli.command {
        Commands::Exec(args) => args.execute(&mut ctx).await,
        Commands::Run(args) => args.execute(&mut ctx).await,
        Commands::Hosts(args) => args.execute(&mut ctx).await,
        Commands::Cache(args) => args.execute(&mut ctx).await,
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}
