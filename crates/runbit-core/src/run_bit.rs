//! Queue entries and the caller-facing event stream

use crate::error::{Error, Result};
use runbit_llm::{estimate_prompt_tokens, ErrorClass, NormalizedRequest, TokenCount};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Event pushed to the caller of a submitted call
#[derive(Debug)]
pub enum CallEvent {
    /// Text fragment of the current attempt
    Delta(String),
    /// An attempt failed and the call will be retried
    AttemptFailed {
        /// 1-based attempt that failed
        attempt: u32,
        /// Error message of the attempt
        error: String,
        /// Error class of the attempt
        class: ErrorClass,
        /// Delay before the re-attempt, when rate limited
        retry_in: Option<Duration>,
    },
    /// The call finished; terminal
    Completed(TokenCount),
    /// The call failed for good; terminal
    Failed(Error),
}

impl CallEvent {
    /// Whether no further events follow
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

/// Lifecycle of a queue entry within one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Waiting for admission
    Wait,
    /// Executing
    InProgress,
    /// Completed
    Done,
    /// Failed
    Error,
}

/// A queued call
#[derive(Debug)]
pub struct RunBit {
    id: u64,
    request: Arc<NormalizedRequest>,
    prompt_tokens: u64,
    attempt: u32,
    status: RunStatus,
    count: TokenCount,
    events: mpsc::UnboundedSender<CallEvent>,
}

impl RunBit {
    /// Create an entry and the handle its events are delivered to
    #[must_use]
    pub fn new(id: u64, request: NormalizedRequest) -> (Self, CallHandle) {
        let prompt_tokens = estimate_prompt_tokens(&request);
        let count = TokenCount::new(
            request.model(),
            request.key(),
            request.profile().tokenizer,
            prompt_tokens,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CallHandle {
            id,
            key: request.key().to_string(),
            prompt_tokens,
            events: rx,
        };
        let bit = Self {
            id,
            request: Arc::new(request),
            prompt_tokens,
            attempt: 1,
            status: RunStatus::Wait,
            count,
            events: tx,
        };
        (bit, handle)
    }

    /// Entry id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Model-class key
    #[must_use]
    pub fn key(&self) -> &str {
        self.request.key()
    }

    /// Normalized request
    #[must_use]
    pub fn request(&self) -> &NormalizedRequest {
        &self.request
    }

    /// Estimated prompt tokens
    #[must_use]
    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    /// Current 1-based attempt
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Token accounting of the current attempt
    #[must_use]
    pub fn count(&self) -> &TokenCount {
        &self.count
    }

    pub(crate) fn count_mut(&mut self) -> &mut TokenCount {
        &mut self.count
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        debug!(id = self.id, from = ?self.status, to = ?status, "Run bit status");
        self.status = status;
    }

    /// Move to the next attempt, back in `Wait`
    pub(crate) fn next_attempt(&mut self) {
        self.attempt += 1;
        self.count.restart();
        self.status = RunStatus::Wait;
    }

    /// Push an event; a caller that stopped listening is ignored
    pub(crate) fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }
}

/// Receiving side of a submitted call
#[derive(Debug)]
pub struct CallHandle {
    id: u64,
    key: String,
    prompt_tokens: u64,
    events: mpsc::UnboundedReceiver<CallEvent>,
}

impl CallHandle {
    /// Entry id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Model-class key
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Estimated prompt tokens
    #[must_use]
    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    /// Next event, or `None` after the terminal one
    pub async fn next(&mut self) -> Option<CallEvent> {
        self.events.recv().await
    }

    /// Drain events until the call ends
    ///
    /// # Errors
    ///
    /// Returns the terminal error of the call, or [`Error::Closed`] if the
    /// scheduler dropped the call without a terminal event.
    pub async fn wait(mut self) -> Result<TokenCount> {
        while let Some(event) = self.next().await {
            match event {
                CallEvent::Completed(count) => return Ok(count),
                CallEvent::Failed(error) => return Err(error),
                CallEvent::Delta(_) | CallEvent::AttemptFailed { .. } => {}
            }
        }
        Err(Error::Closed)
    }
}
