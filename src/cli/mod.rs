//! CLI module for fleetexec
//!
//! Argument parsing and subcommand handling.

pub mod commands;
pub mod output;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fleetexec::escalation::EscalationMode;
use std::path::PathBuf;

/// fleetexec - run one command across a fleet of hosts
#[derive(Parser, Debug, Clone)]
#[command(name = "fleetexec")]
#[command(author = "fleetexec Contributors")]
#[command(version)]
#[command(about = "Run a shell command on many hosts in parallel", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a shell command on every matched host
    Exec(commands::exec::ExecArgs),

    /// Run a local script file on every matched host
    Run(commands::exec::RunArgs),

    /// Resolve a host expression and print the hosts
    Hosts(commands::hosts::HostsArgs),

    /// Manage the work-group cache
    Cache(commands::cache::CacheArgs),
}

/// Options shared by `exec` and `run`
#[derive(Args, Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Escalate with sudo
    #[arg(long, conflicts_with_all = ["su", "no_raise"])]
    pub sudo: bool,

    /// Escalate with su (requires a password)
    #[arg(long, conflicts_with = "no_raise")]
    pub su: bool,

    /// Do not escalate, whatever the config says
    #[arg(long)]
    pub no_raise: bool,

    /// Remote login user
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Account to escalate to
    #[arg(long)]
    pub raise_user: Option<String>,

    /// Prompt for the escalation password
    #[arg(short = 'k', long)]
    pub ask_pass: bool,

    /// Per-host command timeout in seconds
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Maximum concurrent sessions
    #[arg(short = 'n', long)]
    pub threads: Option<usize>,

    /// Result display, overriding main.mode
    #[arg(long, value_parser = ["parallel", "serial", "collapse"])]
    pub mode: Option<String>,

    /// Skip the reachability probe
    #[arg(long)]
    pub no_probe: bool,

    /// Hide the progress bar
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl DispatchOptions {
    /// Escalation mode requested on the command line
    pub fn mode_override(&self) -> Option<EscalationMode> {
        if self.no_raise {
            Some(EscalationMode::None)
        } else if self.su {
            Some(EscalationMode::Su)
        } else if self.sudo {
            Some(EscalationMode::Sudo)
        } else {
            None
        }
    }
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}
