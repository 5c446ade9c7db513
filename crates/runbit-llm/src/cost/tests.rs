//! Tests for cost module

use super::*;
use crate::models::TokenizerKind;
use crate::token::TokenCounter;

#[test]
fn test_calc_cost_formula() {
    // gpt-4o: 0.0025 / 0.01 per 1K
    let cost = calc_cost("gpt-4o", 1_000, 1_000);
    assert!((cost - 0.0125).abs() < 1e-12);

    let cost = calc_cost("gpt-4o", 2_000, 500);
    assert!((cost - (2_000.0 * 0.0025 + 500.0 * 0.01) / 1000.0).abs() < 1e-12);
}

#[test]
fn test_unknown_short_code_costs_nothing() {
    assert_eq!(calc_cost("unk-mdl", 0, 0), 0.0);
    assert_eq!(calc_cost("unk-mdl", 12_345, 67_890), 0.0);
    assert_eq!(calc_cost("unk-mdl", u64::MAX, u64::MAX), 0.0);
}

#[test]
fn test_cost_monotonic_while_streaming() {
    let mut count = TokenCount::new("gpt-4o", "gpt-4o", TokenizerKind::O200k, 120);
    let mut last = count.cost();
    assert!(last > 0.0);

    let deltas = [
        "Once upon", " a time", ", there was", " a queue.\n", "It admitted", " requests\n\n",
        "in order", " and never", " skipped ahead.",
    ];
    for delta in deltas {
        count.push_delta(delta);
        assert!(count.cost() >= last, "cost decreased after {delta:?}");
        last = count.cost();
    }

    let final_cost = count.finalize();
    let expected = calc_cost("gpt-4o", count.prompt_tokens(), count.completion_tokens());
    assert!((final_cost - expected).abs() < 1e-12);
    assert!(count.is_finalized());
}

#[test]
fn test_finalize_matches_whole_text_count() {
    let mut count = TokenCount::new("gpt-4", "gpt-4", TokenizerKind::Cl100k, 10);
    let text = "fn main() {\n    println!(\"hi\");\n}\n\nThe end.  Really\n the end";
    for chunk in text.as_bytes().chunks(3) {
        count.push_delta(std::str::from_utf8(chunk).unwrap());
    }
    count.finalize();

    let reference = TokenCounter::new(TokenizerKind::Cl100k).count_tokens(text);
    assert_eq!(count.completion_tokens(), reference);
    assert_eq!(count.text(), text);
}

#[test]
fn test_reported_usage_is_authoritative() {
    let mut count = TokenCount::new("gemini-1.5-pro", "gemini-15-pro", TokenizerKind::Cl100k, 50);
    count.push_delta("Hello there, how are you doing today?");
    count.apply_usage(UsageHint {
        prompt_tokens: Some(42),
        completion_tokens: Some(3),
    });
    count.push_delta(" Fine.");
    count.apply_usage(UsageHint {
        prompt_tokens: Some(42),
        completion_tokens: Some(11),
    });

    let cost = count.finalize();
    assert_eq!(count.prompt_tokens(), 42);
    assert_eq!(count.completion_tokens(), 11);
    assert!((cost - calc_cost("gemini-15-pro", 42, 11)).abs() < 1e-12);
}

#[test]
fn test_finalized_count_is_frozen() {
    let mut count = TokenCount::new("gpt-4o", "gpt-4o", TokenizerKind::O200k, 5);
    count.push_delta("done");
    let cost = count.finalize();
    count.push_delta(" more text that should be ignored");
    count.apply_usage(UsageHint {
        prompt_tokens: Some(999),
        completion_tokens: Some(999),
    });
    assert_eq!(count.finalize(), cost);
    assert_eq!(count.text(), "done");
}

#[test]
fn test_restart_keeps_prompt() {
    let mut count = TokenCount::new("gpt-4o", "gpt-4o", TokenizerKind::O200k, 77);
    count.push_delta("partial answer");
    count.restart();
    assert_eq!(count.prompt_tokens(), 77);
    assert_eq!(count.completion_tokens(), 0);
    assert!(count.text().is_empty());
    assert!(!count.is_finalized());
}
