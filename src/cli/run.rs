//! `runbit run`: submit calls through the queue and print the results

use crate::app::{resolve_transports, AppConfig};
use anyhow::{bail, Context, Result};
use clap::Args;
use futures::future::join_all;
use runbit_core::{CallEvent, CallExecutor, CallHandle, Scheduler, UsageReport, ALL_KEY};
use runbit_llm::{CallRequest, Message, TokenCount};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Model identifier (defaults to `default_model` from config)
    #[arg(short, long)]
    pub model: Option<String>,
    /// User prompt
    #[arg(short, long)]
    pub prompt: Option<String>,
    /// System prompt placed before the user prompt
    #[arg(short, long)]
    pub system: Option<String>,
    /// JSON file holding a full call request (model, messages, params, label)
    #[arg(short, long, conflicts_with_all = ["prompt", "system"])]
    pub request: Option<PathBuf>,
    /// Label used in history keys
    #[arg(short, long)]
    pub label: Option<String>,
    /// Ask for a JSON object reply
    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub temperature: Option<f64>,
    #[arg(long)]
    pub max_tokens: Option<u32>,
    /// Allow `file://` URLs and local paths in media parts
    #[arg(long)]
    pub allow_local_files: bool,
    /// Submit the same call this many times
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,
}

impl RunArgs {
    /// Build the call request from flags or the request file
    pub fn build_request(&self, default_model: &str) -> Result<CallRequest> {
        let mut request = match &self.request {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read request file {}", path.display()))?;
                serde_json::from_str::<CallRequest>(&content)
                    .with_context(|| format!("Invalid request file {}", path.display()))?
            }
            None => {
                let Some(prompt) = &self.prompt else {
                    bail!("Either --prompt or --request is required");
                };
                let mut request = CallRequest::new(default_model);
                if let Some(system) = &self.system {
                    request = request.with_message(Message::system(system.as_str()));
                }
                request.with_message(Message::user(prompt.as_str()))
            }
        };

        if let Some(model) = &self.model {
            request.model = model.clone();
        }
        if let Some(label) = &self.label {
            request = request.with_label(label.as_str());
        }
        if self.json {
            request = request.with_json_mode(true);
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        Ok(request)
    }
}

pub async fn run(args: RunArgs, config: &AppConfig) -> Result<()> {
    let request = args.build_request(&config.default_model)?;
    let transports = resolve_transports(&config.providers)?;
    let executor = CallExecutor::new(transports, config.history_store());
    let scheduler = Scheduler::new(executor, config.scheduler_config(args.allow_local_files));

    let repeat = args.repeat.max(1);
    let mut handles = Vec::with_capacity(repeat);
    for i in 0..repeat {
        let mut call = request.clone();
        if repeat > 1 {
            let label = match &request.label {
                Some(label) => format!("{label}-{i}"),
                None => format!("r{i}"),
            };
            call = call.with_label(label);
        }
        let handle = scheduler
            .submit(&call)
            .await
            .with_context(|| format!("Failed to submit call to {}", call.model))?;
        handles.push(handle);
    }
    info!(calls = repeat, model = %request.model, "Calls submitted");

    let stream = repeat == 1;
    let results = join_all(handles.into_iter().map(|h| follow(h, stream))).await;

    let mut failed = 0;
    for (id, result) in &results {
        match result {
            Ok(count) if stream => {
                println!();
                print_count(*id, count, false);
            }
            Ok(count) => print_count(*id, count, true),
            Err(e) => {
                failed += 1;
                eprintln!("call {id} failed: {e}");
            }
        }
    }

    print_usage(&scheduler.usage().await);
    scheduler.shutdown().await;

    if failed > 0 {
        bail!("{failed} of {repeat} calls failed");
    }
    Ok(())
}

async fn follow(mut handle: CallHandle, stream: bool) -> (u64, runbit_core::Result<TokenCount>) {
    let id = handle.id();
    while let Some(event) = handle.next().await {
        match event {
            CallEvent::Delta(text) => {
                if stream {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
            }
            CallEvent::AttemptFailed {
                attempt,
                error,
                retry_in: Some(wait),
                ..
            } => eprintln!(
                "call {id}: attempt {attempt} rate limited, retrying in {:.1}s ({error})",
                wait.as_secs_f64()
            ),
            CallEvent::AttemptFailed { attempt, error, .. } => {
                eprintln!("call {id}: attempt {attempt} failed, re-queued ({error})");
            }
            CallEvent::Completed(count) => return (id, Ok(count)),
            CallEvent::Failed(e) => return (id, Err(e)),
        }
    }
    (id, Err(runbit_core::Error::Closed))
}

fn print_count(id: u64, count: &TokenCount, with_text: bool) {
    if with_text {
        println!("call {id}: {}", count.text());
    }
    eprintln!(
        "call {id}: {} prompt + {} completion tokens, ${:.6}",
        count.prompt_tokens(),
        count.completion_tokens(),
        count.cost()
    );
}

fn print_usage(report: &UsageReport) {
    eprintln!();
    eprintln!(
        "{:<18} {:>8} {:>8} {:>10} {:>10} {:>12}",
        "KEY", "CALLS", "FAILED", "PROMPT", "COMPLETION", "COST"
    );
    let rows = report.keys().chain(std::iter::once((ALL_KEY, report.all())));
    for (key, totals) in rows {
        eprintln!(
            "{:<18} {:>8} {:>8} {:>10} {:>10} {:>12.6}",
            key,
            totals.requests,
            totals.failures,
            totals.prompt_tokens,
            totals.completion_tokens,
            totals.cost
        );
    }
}
