//! Provider call executor
//!
//! Runs one attempt of a [`RunBit`]: `Start → Streaming → {Complete | Error}`.
//! History artifacts are written as the attempt progresses; rate-limit
//! headers are forwarded to the scheduler as soon as a response arrives,
//! including non-success responses.

use crate::run_bit::{CallEvent, RunBit};
use crate::scheduler::Scheduler;
use futures::StreamExt;
use runbit_llm::history::{AttemptKey, AttemptLog, HistoryStore};
use runbit_llm::transport::Transports;
use runbit_llm::{Error, Result};
use serde_json::json;
use std::fmt;
use tracing::{debug, info, warn};

/// Executes attempts against the registered transports
#[derive(Clone)]
pub struct CallExecutor {
    transports: Transports,
    history: HistoryStore,
}

impl fmt::Debug for CallExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallExecutor")
            .field("transports", &self.transports)
            .field("history", &self.history.root())
            .finish()
    }
}

impl CallExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(transports: Transports, history: HistoryStore) -> Self {
        Self {
            transports,
            history,
        }
    }

    /// History store used for attempt artifacts
    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Run one attempt; deltas go to the caller, the count lives on the bit
    ///
    /// # Errors
    ///
    /// Returns the attempt's error; the scheduler decides whether to retry.
    pub async fn execute(&self, bit: &mut RunBit, scheduler: &Scheduler) -> Result<()> {
        let key = AttemptKey::new(bit.request(), bit.attempt());
        let mut log = match self.history.begin(&key).await {
            Ok(log) => log,
            Err(e) => {
                warn!(key = %key, error = %e, "History unavailable for attempt");
                AttemptLog::disabled()
            }
        };

        let result = self.stream(bit, scheduler, &mut log).await;

        match &result {
            Ok(()) => {
                let cost = bit.count_mut().finalize();
                record(log.write_result(bit.count().text()).await);
                info!(
                    key = %key,
                    model = %bit.request().model(),
                    prompt_tokens = bit.count().prompt_tokens(),
                    completion_tokens = bit.count().completion_tokens(),
                    cost,
                    "Call completed"
                );
            }
            Err(e) => {
                let detail = match e.root() {
                    Error::Blocked { detail, .. } => detail.clone(),
                    _ => serde_json::Value::Null,
                };
                let body = json!({
                    "class": format!("{:?}", e.class()),
                    "message": e.to_string(),
                    "attempt": bit.attempt(),
                    "detail": detail,
                });
                record(log.write_error(&body).await);
            }
        }
        result
    }

    async fn stream(&self, bit: &mut RunBit, scheduler: &Scheduler, log: &mut AttemptLog) -> Result<()> {
        let provider = bit.request().profile().provider;
        let transport = self.transports.get(provider)?;

        let payload = transport.payload(bit.request())?;
        record(log.write_request(&payload).await);

        debug!(
            id = bit.id(),
            attempt = bit.attempt(),
            transport = transport.name(),
            "Opening stream"
        );
        let response = match transport.open(bit.request(), &payload).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(envelope) = e.envelope() {
                    record(log.write_response(envelope).await);
                }
                if let Some(update) = e.rate_limits() {
                    scheduler.update_limits(bit.key(), *update).await;
                }
                return Err(e);
            }
        };
        record(log.write_response(&response.envelope).await);
        if let Some(update) = response.rate_limits {
            scheduler.update_limits(bit.key(), update).await;
        }

        let mut chunks = response.chunks;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            record(log.append_frame(&chunk.frame).await);

            if !chunk.text_delta.is_empty() {
                bit.count_mut().push_delta(&chunk.text_delta);
                bit.emit(CallEvent::Delta(chunk.text_delta));
            }
            if let Some(usage) = chunk.usage {
                bit.count_mut().apply_usage(usage);
            }
            if let Some(signal) = chunk.blocked {
                return Err(signal.into());
            }
        }
        Ok(())
    }
}

fn record(result: Result<()>) {
    if let Err(e) = result {
        warn!(error = %e, "Failed to write history artifact");
    }
}
