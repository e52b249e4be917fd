//! Command-line surface: `workplan {run,check,plan}` and
//! `blueprint {run,check}`, mirroring the reference tool's argument layout.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "simwork")]
#[command(author, version, about = "Run and inspect simulation workplans", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Operate on a multi-step workplan document.
    Workplan {
        #[command(subcommand)]
        action: WorkplanAction,
    },
    /// Operate on a single-application blueprint document.
    Blueprint {
        #[command(subcommand)]
        action: BlueprintAction,
    },
}

#[derive(Subcommand)]
pub enum WorkplanAction {
    /// Validate the workplan, then run it to completion.
    Run {
        /// Path to a workplan YAML document.
        path: PathBuf,
        /// Seconds between backend status polls.
        #[arg(long, default_value = "2")]
        poll_interval_secs: u64,
    },
    /// Validate the workplan without running anything.
    Check { path: PathBuf },
    /// Print the step execution order without running anything.
    Plan { path: PathBuf },
}

#[derive(Subcommand)]
pub enum BlueprintAction {
    /// Validate the blueprint, then run it as a single step.
    Run {
        path: PathBuf,
        #[arg(long, default_value = "2")]
        poll_interval_secs: u64,
    },
    /// Validate the blueprint without running it.
    Check { path: PathBuf },
}
