//! Exec and run commands - dispatch a command or script to many hosts

use super::CommandContext;
use crate::cli::DispatchOptions;
use anyhow::{Context, Result};
use clap::Parser;
use fleetexec::executor::RunRequest;
use std::path::PathBuf;
use std::time::Duration;

/// Arguments for the exec command
#[derive(Parser, Debug, Clone)]
pub struct ExecArgs {
    #[command(flatten)]
    pub dispatch: DispatchOptions,

    /// Host expression (`%group`, `%group#tag`, `host[:port]`, `-exclusion`)
    pub expression: String,

    /// Command to run, joined with spaces
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        dispatch(ctx, &self.dispatch, &self.expression, self.command.join(" ")).await
    }
}

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub dispatch: DispatchOptions,

    /// Host expression
    pub expression: String,

    /// Local script file to run on every host
    pub script: PathBuf,
}

impl RunArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let script = std::fs::read_to_string(&self.script)
            .with_context(|| format!("Failed to read script: {}", self.script.display()))?;
        if script.trim().is_empty() {
            ctx.output
                .error(&format!("Script is empty: {}", self.script.display()));
            return Ok(1);
        }
        dispatch(ctx, &self.dispatch, &self.expression, script).await
    }
}

async fn dispatch(
    ctx: &mut CommandContext,
    options: &DispatchOptions,
    expression: &str,
    command: String,
) -> Result<i32> {
    let engine = ctx.engine(options)?;
    let mode = ctx.run_mode(options)?;
    let streaming = mode.streams() && !ctx.output.is_json();
    let timeout = options
        .timeout
        .map(Duration::from_secs)
        .or_else(|| ctx.config.command_timeout());
    let request = RunRequest::new(expression, command)
        .with_mode(options.mode_override())
        .with_timeout(timeout);

    ctx.output.info(&format!(
        "Running on '{}' in {} mode with up to {} sessions",
        expression,
        mode,
        engine.pool().config().workers
    ));

    let progress = if options.quiet || streaming {
        None
    } else {
        ctx.output.create_progress()
    };
    let output = engine
        .run_observed(&request, ctx.cancel.clone(), |outcome| {
            if streaming {
                ctx.output.stream_outcome(outcome);
            } else {
                ctx.output.outcome_progress(progress.as_ref(), outcome);
            }
        })
        .await;
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    let output = output?;

    ctx.output.stale_groups(&output.stale);
    if ctx.cancel.is_cancelled() {
        ctx.output.warning("Run cancelled, unfinished hosts are reported as stopped");
    }
    ctx.output.report(&output, mode);
    Ok(output.report.exit_code())
}
