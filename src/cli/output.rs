//! Output formatting module for fleetexec
//!
//! Provides colored report output, progress bars and JSON output.

use colored::Colorize;
use fleetexec::config::RunMode;
use fleetexec::executor::{HostOutcome, OutcomeStatus, RunOutput};
use fleetexec::inventory::{Host, StaleGroup};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::time::{Duration, Instant};

const RULE_WIDTH: usize = 72;

/// Every line of `text` behind `prefix: `, each ending in a newline
pub fn prefix_lines(prefix: &str, text: &str) -> String {
    text.lines()
        .map(|line| format!("{}: {}\n", prefix, line))
        .collect()
}

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
    /// Start time for duration calculations
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        colored::control::set_override(use_color);

        Self {
            use_color,
            json_mode,
            verbosity,
            start_time: Instant::now(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    fn rule(&self) -> String {
        let line = "-".repeat(RULE_WIDTH);
        if self.use_color {
            line.bright_black().to_string()
        } else {
            line
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            let err = serde_json::json!({
                "type": "error",
                "message": message
            });
            eprintln!("{}", err);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            let warn = serde_json::json!({
                "type": "warning",
                "message": message
            });
            eprintln!("{}", warn);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 || self.json_mode {
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "INFO:".blue(), message);
        } else {
            eprintln!("INFO: {}", message);
        }
    }

    /// Print stale inventory warnings
    pub fn stale_groups(&self, stale: &[StaleGroup]) {
        for warning in stale {
            self.warning(&warning.to_string());
        }
    }

    /// Spinner counting finished hosts
    pub fn create_progress(&self) -> Option<ProgressBar> {
        if self.json_mode {
            return None;
        }

        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} hosts finished {msg}")
            .ok()?;
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }

    /// Advance the progress bar for one outcome
    pub fn outcome_progress(&self, pb: Option<&ProgressBar>, outcome: &HostOutcome) {
        let Some(pb) = pb else {
            return;
        };
        pb.inc(1);
        if self.verbosity >= 1 {
            let status = match &outcome.status {
                OutcomeStatus::Exited { code: 0 } => "ok".green().to_string(),
                OutcomeStatus::Exited { code } => format!("exit {}", code).red().to_string(),
                OutcomeStatus::EscalationFailed { .. } => "escalation failed".red().to_string(),
                OutcomeStatus::Unreachable { reason } => reason.to_string().yellow().to_string(),
            };
            pb.println(format!("{}: {}", outcome.host, status));
        }
        pb.set_message(outcome.host.name());
    }

    /// Print one finished host's output as `host: line`
    pub fn stream_outcome(&self, outcome: &HostOutcome) {
        let host = outcome.host.to_string();
        match &outcome.status {
            OutcomeStatus::Unreachable { reason } => {
                self.warning(&format!("{}: {}", host, reason));
                return;
            }
            OutcomeStatus::EscalationFailed { .. } => {
                self.error(&format!("{}: escalation failed", host));
            }
            OutcomeStatus::Exited { code } if *code != 0 && self.verbosity >= 1 => {
                self.warning(&format!("{}: exit {}", host, code));
            }
            OutcomeStatus::Exited { .. } => {}
        }

        let prefix = if self.use_color {
            host.cyan().bold().to_string()
        } else {
            host
        };
        print!("{}", prefix_lines(&prefix, &outcome.output));
        self.flush();
    }

    /// Print the run report. Grouped outputs are only shown in collapse
    /// mode; the streaming modes already printed them.
    pub fn report(&self, output: &RunOutput, mode: RunMode) {
        if self.json_mode {
            match serde_json::to_string_pretty(output) {
                Ok(json) => println!("{}", json),
                Err(e) => self.error(&format!("failed to serialize report: {}", e)),
            }
            return;
        }

        let report = &output.report;
        let summary = if !report.error.is_empty() {
            report.summary().red().bold().to_string()
        } else if report.stopped > 0 {
            report.summary().yellow().bold().to_string()
        } else {
            report.summary().green().bold().to_string()
        };

        if mode == RunMode::Collapse {
            println!("{}", self.rule());
            println!("{}", summary);
            println!("{}", self.rule());
        }

        for (text, hosts) in report.outputs.iter().filter(|_| mode == RunMode::Collapse) {
            println!(
                "{} {}",
                hosts.join(", ").cyan().bold(),
                format!("({})", hosts.len()).bright_black()
            );
            if text.is_empty() {
                println!("{}", "(no output)".bright_black());
            } else {
                print!("{}", text);
                if !text.ends_with('\n') {
                    println!();
                }
            }
            println!();
        }

        if report.stopped > 0 {
            println!("{}", format!("Stopped: {}", report.stopped).yellow().bold());
            for stopped in &report.stopped_hosts {
                println!("  {} {}", stopped.host, format!("({})", stopped.reason).bright_black());
            }
            println!();
        }

        println!("{}", self.rule());
        println!("{}", summary);
        println!("{}", self.rule());

        if self.verbosity >= 1 {
            eprintln!(
                "Finished in {:.2}s",
                self.start_time.elapsed().as_secs_f64()
            );
        }
        self.flush();
    }

    /// Print a resolved host list
    pub fn hosts(&self, hosts: &[Host]) {
        if self.json_mode {
            match serde_json::to_string_pretty(hosts) {
                Ok(json) => println!("{}", json),
                Err(e) => self.error(&format!("failed to serialize hosts: {}", e)),
            }
            return;
        }

        for host in hosts {
            let mut line = host.name();
            if let Some(group) = &host.group {
                line.push_str(&format!("  {}", format!("%{}", group).bright_black()));
            }
            if !host.tags.is_empty() {
                line.push_str(&format!("  {}", format!("#{}", host.tags.join(",#")).bright_black()));
            }
            println!("{}", line);
        }
        if self.verbosity >= 1 {
            eprintln!("{} hosts", hosts.len());
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}
