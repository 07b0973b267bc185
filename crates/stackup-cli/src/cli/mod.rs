//! CLI definitions for the `stackup` binary.
//!
//! Without a subcommand, `stackup` runs the workflow found in the working
//! directory (or the file named by `--config`) until interrupted.

pub mod init;
pub mod reporter;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run a project's development workflow: preconditions, servers, tasks and schedules.
#[derive(Parser)]
#[command(name = "stackup", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Workflow file to load instead of stackup.yaml / stackup.yml / stackup.dist.yaml.
    #[arg(short, long, global = true, env = "STACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter stackup.yaml into the current directory.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Log filter for the chosen verbosity. `RUST_LOG` still wins when set.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,stackup=debug",
            _ => "trace",
        }
    }
}
