//! Token and cost accounting
//!
//! # Module Structure
//!
//! - `pricing`: short-code cost formula
//! - `count`: per-call [`TokenCount`] accumulator
//! - `estimate`: prompt token estimate for a normalized request

mod count;
mod estimate;
mod pricing;

#[cfg(test)]
mod tests;

pub use count::{TokenCount, UsageHint};
pub use estimate::estimate_prompt_tokens;
pub use pricing::calc_cost;
