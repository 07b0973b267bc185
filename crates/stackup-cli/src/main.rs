//! stackup entry point.
//!
//! Binary name: `stackup`
//!
//! Parses the command line, installs tracing, then either scaffolds a starter
//! workflow (`stackup init`) or runs the project's workflow until interrupted.

mod cli;
mod state;

use std::process::ExitCode;

use clap::Parser;
use stackup_observe::tracing_setup::{init_tracing, otel_requested, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(cli.log_filter(), otel_requested())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let working_dir = std::env::current_dir()?;

    let result = match cli.command {
        Some(Commands::Init { force }) => cli::init::init_workflow(&working_dir, force)
            .await
            .map(|path| {
                println!(
                    "  {} Created {}",
                    console::style("✓").green(),
                    console::style(path.display()).cyan()
                );
                ExitCode::SUCCESS
            }),
        None => cli::run::run_workflow(&working_dir, cli.config.as_deref()).await,
    };

    shutdown_tracing();
    result
}
