//! Spend aggregation per model-class key

use runbit_llm::TokenCount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the rollup across all model-class keys
pub const ALL_KEY: &str = "all";

/// Running totals for one key
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Prompt tokens of completed calls
    pub prompt_tokens: u64,
    /// Completion tokens of completed calls
    pub completion_tokens: u64,
    /// Cost in USD of completed calls
    pub cost: f64,
    /// Completed calls
    pub requests: u64,
    /// Failed attempts
    pub failures: u64,
}

impl UsageTotals {
    fn add(&mut self, count: &TokenCount) {
        self.prompt_tokens += count.prompt_tokens();
        self.completion_tokens += count.completion_tokens();
        self.cost += count.cost();
        self.requests += 1;
    }
}

/// Per-key totals plus the `"all"` rollup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    by_key: BTreeMap<String, UsageTotals>,
    all: UsageTotals,
}

impl UsageReport {
    /// Empty report
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed call
    pub fn record_success(&mut self, count: &TokenCount) {
        self.by_key
            .entry(count.short_code().to_string())
            .or_default()
            .add(count);
        self.all.add(count);
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self, key: &str) {
        self.by_key.entry(key.to_string()).or_default().failures += 1;
        self.all.failures += 1;
    }

    /// Totals for a key; `"all"` yields the rollup
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&UsageTotals> {
        if key == ALL_KEY {
            return Some(&self.all);
        }
        self.by_key.get(key)
    }

    /// Rollup across all keys
    #[must_use]
    pub fn all(&self) -> &UsageTotals {
        &self.all
    }

    /// Per-key totals in key order
    pub fn keys(&self) -> impl Iterator<Item = (&str, &UsageTotals)> {
        self.by_key.iter().map(|(k, v)| (k.as_str(), v))
    }
}
