//! Per-key rate-limit budget
//!
//! The scheduler decrements the budget pessimistically on admission, and
//! vendor-reported values overwrite it whenever a response carries them.
//! Counters are signed: an oversized call admitted at the start of a window
//! drives `remaining_tokens` below zero.

use runbit_llm::RateLimitUpdate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request and token budget for one model-class key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Requests allowed per window
    pub limit_requests: i64,
    /// Tokens allowed per window
    pub limit_tokens: i64,
    /// Requests left in the current window
    pub remaining_requests: i64,
    /// Tokens left in the current window
    pub remaining_tokens: i64,
    /// Last reported time until the request budget resets
    pub reset_requests: Option<Duration>,
    /// Last reported time until the token budget resets
    pub reset_tokens: Option<Duration>,
}

impl RateLimitState {
    /// A zeroed budget that admits nothing
    #[must_use]
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// A full budget
    #[must_use]
    pub fn new(limit_requests: u64, limit_tokens: u64) -> Self {
        let limit_requests = to_signed(limit_requests);
        let limit_tokens = to_signed(limit_tokens);
        Self {
            limit_requests,
            limit_tokens,
            remaining_requests: limit_requests,
            remaining_tokens: limit_tokens,
            reset_requests: None,
            reset_tokens: None,
        }
    }

    /// Overwrite with every field the vendor reported
    pub fn apply(&mut self, update: &RateLimitUpdate) {
        if let Some(v) = update.limit_requests {
            self.limit_requests = to_signed(v);
        }
        if let Some(v) = update.limit_tokens {
            self.limit_tokens = to_signed(v);
        }
        if let Some(v) = update.remaining_requests {
            self.remaining_requests = to_signed(v);
        }
        if let Some(v) = update.remaining_tokens {
            self.remaining_tokens = to_signed(v);
        }
        if update.reset_requests.is_some() {
            self.reset_requests = update.reset_requests;
        }
        if update.reset_tokens.is_some() {
            self.reset_tokens = update.reset_tokens;
        }
    }

    /// Start a fresh window with `in_progress` calls still running
    pub fn reset_window(&mut self, in_progress: usize) {
        self.remaining_requests = self.limit_requests - to_signed(in_progress as u64);
        self.remaining_tokens = self.limit_tokens;
    }

    /// Whether the token budget is untouched in this window
    #[must_use]
    pub fn is_full_window(&self) -> bool {
        self.remaining_tokens == self.limit_tokens
    }

    /// Whether a call needing `prompt_tokens` may be admitted now
    ///
    /// A call larger than what remains is held back unless the window is
    /// untouched.
    #[must_use]
    pub fn admits(&self, prompt_tokens: u64) -> bool {
        to_signed(prompt_tokens) <= self.remaining_tokens || self.is_full_window()
    }

    /// Debit one admitted call
    pub fn debit(&mut self, prompt_tokens: u64) {
        self.remaining_requests -= 1;
        self.remaining_tokens -= to_signed(prompt_tokens);
    }

    /// Timer length for the window: the longest reset hint, else `default`
    #[must_use]
    pub fn window(&self, default: Duration) -> Duration {
        match (self.reset_requests, self.reset_tokens) {
            (Some(a), Some(b)) => a.max(b),
            (Some(d), None) | (None, Some(d)) => d,
            (None, None) => default,
        }
    }
}

fn to_signed(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_state_is_a_full_empty_window() {
        let state = RateLimitState::zeroed();
        assert_eq!(state.remaining_requests, 0);
        // Zero of zero is a full window; the request budget still blocks
        assert!(state.admits(10));
    }

    #[test]
    fn test_oversized_call_at_window_start() {
        let mut state = RateLimitState::new(10, 1000);
        assert!(state.admits(5000));
        state.debit(5000);
        assert_eq!(state.remaining_tokens, -4000);
        assert_eq!(state.remaining_requests, 9);
        assert!(!state.admits(1));
    }

    #[test]
    fn test_partial_window_holds_large_call() {
        let mut state = RateLimitState::new(10, 1000);
        state.debit(100);
        assert!(state.admits(900));
        assert!(!state.admits(901));
    }

    #[test]
    fn test_apply_overwrites_reported_fields_only() {
        let mut state = RateLimitState::new(10, 1000);
        state.debit(600);
        state.apply(&RateLimitUpdate {
            remaining_tokens: Some(950),
            reset_tokens: Some(Duration::from_secs(3)),
            ..RateLimitUpdate::default()
        });
        assert_eq!(state.remaining_tokens, 950);
        assert_eq!(state.remaining_requests, 9);
        assert_eq!(state.limit_tokens, 1000);
        assert_eq!(state.window(Duration::from_secs(60)), Duration::from_secs(3));
    }

    #[test]
    fn test_reset_window_counts_running_calls() {
        let mut state = RateLimitState::new(3, 1000);
        state.debit(400);
        state.debit(400);
        state.reset_window(2);
        assert_eq!(state.remaining_requests, 1);
        assert_eq!(state.remaining_tokens, 1000);
    }

    #[test]
    fn test_window_defaults() {
        let mut state = RateLimitState::new(1, 1);
        assert_eq!(state.window(Duration::from_secs(60)), Duration::from_secs(60));
        state.reset_requests = Some(Duration::from_secs(2));
        state.reset_tokens = Some(Duration::from_secs(5));
        assert_eq!(state.window(Duration::from_secs(60)), Duration::from_secs(5));
    }
}
