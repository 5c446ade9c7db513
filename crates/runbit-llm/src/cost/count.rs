//! Per-call token accumulator

use super::pricing::calc_cost;
use crate::models::TokenizerKind;
use crate::token::TokenCounter;
use serde::{Deserialize, Serialize};

/// Token counts reported in-band by a vendor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageHint {
    /// Prompt tokens, if reported
    pub prompt_tokens: Option<u64>,
    /// Cumulative completion tokens, if reported
    pub completion_tokens: Option<u64>,
}

impl UsageHint {
    /// Whether the hint carries any count
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none() && self.completion_tokens.is_none()
    }
}

/// Token and cost accumulator for one call
///
/// Completion tokens are counted incrementally: text is settled at line
/// boundaries (a newline followed by non-whitespace), which the tiktoken
/// pre-tokenizer never merges across, so only the unsettled tail is
/// re-encoded on each delta. [`TokenCount::finalize`] yields the same count
/// as encoding the whole text at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCount {
    model: String,
    short_code: String,
    tokenizer: TokenizerKind,
    prompt_tokens: u64,
    completion_tokens: u64,
    cost: f64,
    text: String,
    #[serde(skip)]
    settled_len: usize,
    #[serde(skip)]
    settled_tokens: u64,
    reported_prompt: Option<u64>,
    reported_completion: Option<u64>,
    finalized: bool,
}

impl TokenCount {
    /// Create an accumulator seeded with the prompt estimate
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        short_code: impl Into<String>,
        tokenizer: TokenizerKind,
        prompt_tokens: u64,
    ) -> Self {
        let mut count = Self {
            model: model.into(),
            short_code: short_code.into(),
            tokenizer,
            prompt_tokens,
            completion_tokens: 0,
            cost: 0.0,
            text: String::new(),
            settled_len: 0,
            settled_tokens: 0,
            reported_prompt: None,
            reported_completion: None,
            finalized: false,
        };
        count.recompute();
        count
    }

    /// Model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Model-class key
    #[must_use]
    pub fn short_code(&self) -> &str {
        &self.short_code
    }

    /// Current prompt tokens
    #[must_use]
    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    /// Current completion tokens
    #[must_use]
    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens
    }

    /// Current cost in USD
    #[must_use]
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Text accumulated so far
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the count is frozen
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Append a streamed text delta
    pub fn push_delta(&mut self, delta: &str) {
        if self.finalized || delta.is_empty() {
            return;
        }
        self.text.push_str(delta);
        self.settle();

        let estimate = self.settled_tokens + self.tail_tokens();
        let live = estimate.max(self.reported_completion.unwrap_or(0));
        self.completion_tokens = self.completion_tokens.max(live);
        self.recompute();
    }

    /// Apply vendor-reported counts; they override local estimates
    pub fn apply_usage(&mut self, usage: UsageHint) {
        if self.finalized {
            return;
        }
        if let Some(prompt) = usage.prompt_tokens {
            self.reported_prompt = Some(prompt);
            self.prompt_tokens = prompt;
        }
        if let Some(completion) = usage.completion_tokens {
            self.reported_completion = Some(completion);
            self.completion_tokens = self.completion_tokens.max(completion);
        }
        self.recompute();
    }

    /// Freeze the count and return the final cost
    ///
    /// Without a vendor-reported completion count the accumulated text is
    /// counted as a whole.
    pub fn finalize(&mut self) -> f64 {
        if self.finalized {
            return self.cost;
        }
        self.completion_tokens = match self.reported_completion {
            Some(reported) => reported,
            None => self.settled_tokens + self.tail_tokens(),
        };
        if let Some(prompt) = self.reported_prompt {
            self.prompt_tokens = prompt;
        }
        self.finalized = true;
        self.recompute();
        self.cost
    }

    /// Clear completion state for a fresh attempt, keeping the prompt estimate
    pub fn restart(&mut self) {
        self.completion_tokens = 0;
        self.text.clear();
        self.settled_len = 0;
        self.settled_tokens = 0;
        self.reported_completion = None;
        self.finalized = false;
        self.recompute();
    }

    fn counter(&self) -> TokenCounter {
        TokenCounter::new(self.tokenizer)
    }

    fn tail_tokens(&self) -> u64 {
        self.counter().count_tokens(&self.text[self.settled_len..])
    }

    fn settle(&mut self) {
        let tail = &self.text[self.settled_len..];
        let boundary = tail
            .char_indices()
            .zip(tail.chars().skip(1))
            .filter(|((_, c), next)| *c == '\n' && !next.is_whitespace())
            .map(|((i, _), _)| i + 1)
            .last();
        if let Some(offset) = boundary {
            let end = self.settled_len + offset;
            self.settled_tokens += self.counter().count_tokens(&self.text[self.settled_len..end]);
            self.settled_len = end;
        }
    }

    fn recompute(&mut self) {
        self.cost = calc_cost(&self.short_code, self.prompt_tokens, self.completion_tokens);
    }
}
