//! CLI module for Runbit
//!
//! Provides commands:
//! - `run`: submit one or more calls through the rate-limited queue
//! - `models`: list the model registry

use crate::app::AppConfig;
use clap::{Parser, Subcommand};

pub mod models;
pub mod run;

/// Runbit CLI
#[derive(Parser, Debug)]
#[command(name = "runbit")]
#[command(about = "Per-model rate-limited LLM call queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit calls and stream the replies
    Run(run::RunArgs),
    /// List known models with their rates and default limits
    Models,
}

/// Run the CLI command
pub async fn run(cli: Cli, config: &AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Run(args)) => run::run(args, config).await,
        Some(Commands::Models) => {
            models::run();
            Ok(())
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
