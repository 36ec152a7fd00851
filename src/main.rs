//! Omni Setup - CI installer for the omni CLI
//!
//! CLI entry point that dispatches to the two pipeline phases.

use clap::Parser;
use console::style;
use omni_setup::cli::{Cli, Commands};
use omni_setup::error::SetupResult;
use omni_setup::workflow;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging: 0 = info (CI default), 1+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("omni_setup=info"),
        _ => EnvFilter::new("omni_setup=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Mark the step failed for the runner, then for the operator
            workflow::error(&e.to_string());
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> SetupResult<()> {
    match cli.command {
        Commands::Run(args) => omni_setup::cli::commands::run(args).await,
        Commands::Post => omni_setup::cli::commands::post().await,
    }
}
