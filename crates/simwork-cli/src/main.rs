//! Command-line entry point for running and inspecting simulation workplans.

mod cli;
mod command;
mod document;

use std::time::Duration;

use clap::Parser;
use cli::{BlueprintAction, Cli, Commands, WorkplanAction};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Workplan { action } => match action {
            WorkplanAction::Check { path } => command::check_workplan(&path),
            WorkplanAction::Plan { path } => command::plan_workplan(&path),
            WorkplanAction::Run {
                path,
                poll_interval_secs,
            } => {
                command::run_workplan(&path, Duration::from_secs(poll_interval_secs)).await
            }
        },
        Commands::Blueprint { action } => match action {
            BlueprintAction::Check { path } => command::check_blueprint(&path),
            BlueprintAction::Run {
                path,
                poll_interval_secs,
            } => {
                command::run_blueprint(&path, Duration::from_secs(poll_interval_secs)).await
            }
        },
    }
}
