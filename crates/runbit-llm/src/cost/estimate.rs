//! Prompt token estimate

use crate::normalize::NormalizedRequest;
use crate::token::TokenCounter;

/// Estimate prompt tokens for a normalized request
///
/// Text is counted with the model's tokenizer plus per-message and
/// per-conversation overhead; media parts add their token-equivalent cost.
#[must_use]
pub fn estimate_prompt_tokens(request: &NormalizedRequest) -> u64 {
    let counter = TokenCounter::new(request.profile().tokenizer);
    counter.count_conversation_tokens(request.messages()) + request.media_tokens()
}
