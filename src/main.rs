//! Runbit - per-model rate-limited LLM call queue
//!
//! CLI entry point.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod cli;

const DEFAULT_FILTER: &str = "runbit=info,runbit_core=info,runbit_llm=info";

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let config = app::load_config()?;
    let _guard = init_tracing(&config.logging);

    debug!("Starting Runbit v{}", env!("CARGO_PKG_VERSION"));
    cli::run(cli, &config).await
}

/// Install the subscriber; the guard flushes the log file on drop
fn init_tracing(logging: &app::LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let (text_file, json_file, guard) = match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if logging.json {
                (None, Some(fmt::layer().json().with_writer(writer)), Some(guard))
            } else {
                (
                    Some(fmt::layer().with_ansi(false).with_writer(writer)),
                    None,
                    Some(guard),
                )
            }
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(text_file)
        .with(json_file)
        .init();

    guard
}
