//! Cost formula
//!
//! Rates come from the model registry, keyed by short code, in USD per 1K
//! tokens.

use crate::models;

/// Cost of a call in USD
///
/// `(prompt * prompt_rate + completion * completion_rate) / 1000`.
/// Short codes missing from the registry cost nothing.
#[must_use]
pub fn calc_cost(short_code: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let Some((prompt_rate, completion_rate)) = models::rates(short_code) else {
        return 0.0;
    };
    (prompt_tokens as f64 * prompt_rate + completion_tokens as f64 * completion_rate) / 1000.0
}
