//! Retry policy for failed attempts
//!
//! Decides what happens after an attempt fails:
//! - rate limited: re-attempt after the vendor's wait (or the default)
//! - transient: re-submit to the back of the wait queue
//! - anything else: terminal

use runbit_llm::{Error, ErrorClass};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts per call, the first included
    pub max_attempts: u32,
    /// Wait after a rate-limit error without a reset hint
    pub default_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            default_wait: Duration::from_secs(60),
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-attempt the same call after the wait, outside the wait queue
    Delay(Duration),
    /// Re-submit the call to the back of the wait queue
    Requeue,
    /// The attempt ceiling was reached
    Exhausted,
    /// Not retryable
    Terminal,
}

impl RetryPolicy {
    /// Create a new retry policy
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum attempts
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the wait used when a rate-limit error carries no hint
    #[must_use]
    pub fn with_default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    /// Decide the follow-up for `error` on the given 1-based attempt
    #[must_use]
    pub fn decide(&self, error: &Error, attempt: u32) -> RetryDecision {
        match error.class() {
            ErrorClass::Malformed | ErrorClass::Policy | ErrorClass::Blocked => {
                RetryDecision::Terminal
            }
            _ if attempt >= self.max_attempts => RetryDecision::Exhausted,
            ErrorClass::RateLimited => {
                RetryDecision::Delay(error.retry_after().unwrap_or(self.default_wait))
            }
            ErrorClass::Transient => RetryDecision::Requeue,
        }
    }
}
