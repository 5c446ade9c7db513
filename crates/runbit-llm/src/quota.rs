//! Rate limit signals
//!
//! Parses vendor rate-limit headers into a [`RateLimitUpdate`]. Supports
//! Anthropic (`anthropic-ratelimit-*`) and OpenAI-compatible
//! (`x-ratelimit-*`) formats plus `retry-after`.

use crate::models::ProviderKind;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate-limit values reported by a vendor; absent fields are unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitUpdate {
    /// Requests allowed per window
    pub limit_requests: Option<u64>,
    /// Tokens allowed per window
    pub limit_tokens: Option<u64>,
    /// Requests left in the current window
    pub remaining_requests: Option<u64>,
    /// Tokens left in the current window
    pub remaining_tokens: Option<u64>,
    /// Time until the request budget resets
    pub reset_requests: Option<Duration>,
    /// Time until the token budget resets
    pub reset_tokens: Option<Duration>,
}

impl RateLimitUpdate {
    /// Returns `true` if at least one field was parsed.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.limit_requests.is_some()
            || self.limit_tokens.is_some()
            || self.remaining_requests.is_some()
            || self.remaining_tokens.is_some()
            || self.reset_requests.is_some()
            || self.reset_tokens.is_some()
    }

    /// Longest of the reported reset times
    #[must_use]
    pub fn wait_hint(&self) -> Option<Duration> {
        match (self.reset_requests, self.reset_tokens) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Parse rate-limit headers in the vendor's format
#[must_use]
pub fn parse_rate_limit_headers(provider: ProviderKind, headers: &HeaderMap) -> RateLimitUpdate {
    match provider {
        ProviderKind::Anthropic => parse_anthropic_headers(headers),
        ProviderKind::OpenAi => parse_openai_headers(headers),
        ProviderKind::Gemini => {
            let anthropic = parse_anthropic_headers(headers);
            if anthropic.has_data() {
                anthropic
            } else {
                parse_openai_headers(headers)
            }
        }
    }
}

/// Parse OpenAI-compatible rate limit headers.
#[must_use]
pub fn parse_openai_headers(headers: &HeaderMap) -> RateLimitUpdate {
    RateLimitUpdate {
        limit_requests: header_u64(headers, "x-ratelimit-limit-requests"),
        limit_tokens: header_u64(headers, "x-ratelimit-limit-tokens"),
        remaining_requests: header_u64(headers, "x-ratelimit-remaining-requests"),
        remaining_tokens: header_u64(headers, "x-ratelimit-remaining-tokens"),
        reset_requests: header_reset(headers, "x-ratelimit-reset-requests"),
        reset_tokens: header_reset(headers, "x-ratelimit-reset-tokens"),
    }
}

/// Parse Anthropic rate limit headers.
#[must_use]
pub fn parse_anthropic_headers(headers: &HeaderMap) -> RateLimitUpdate {
    RateLimitUpdate {
        limit_requests: header_u64(headers, "anthropic-ratelimit-requests-limit"),
        limit_tokens: header_u64(headers, "anthropic-ratelimit-tokens-limit"),
        remaining_requests: header_u64(headers, "anthropic-ratelimit-requests-remaining"),
        remaining_tokens: header_u64(headers, "anthropic-ratelimit-tokens-remaining"),
        reset_requests: header_reset(headers, "anthropic-ratelimit-requests-reset"),
        reset_tokens: header_reset(headers, "anthropic-ratelimit-tokens-reset"),
    }
}

/// Wait requested by `retry-after-ms` or `retry-after`
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = header_str(headers, "retry-after-ms").and_then(|s| s.parse::<f64>().ok()) {
        return Duration::try_from_secs_f64(ms / 1000.0).ok();
    }
    header_str(headers, "retry-after").and_then(parse_reset)
}

/// Backoff for a 429 response: `retry-after`, else the longest reset hint
#[must_use]
pub fn rate_limit_wait(provider: ProviderKind, headers: &HeaderMap) -> Option<Duration> {
    retry_after(headers).or_else(|| parse_rate_limit_headers(provider, headers).wait_hint())
}

/// Extract a u64 value from a header.
fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name).and_then(|s| s.parse().ok())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

fn header_reset(headers: &HeaderMap, name: &str) -> Option<Duration> {
    header_str(headers, name).and_then(parse_reset)
}

/// Parse a reset hint: RFC 3339 timestamp, Go-style duration or seconds
#[must_use]
pub fn parse_reset(value: &str) -> Option<Duration> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        let until = dt.with_timezone(&Utc) - Utc::now();
        return Some(until.to_std().unwrap_or(Duration::ZERO));
    }
    let secs = parse_go_duration(value).or_else(|| value.parse::<f64>().ok())?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Parse a Go-style duration string into total seconds.
///
/// Accepts `"6m0s"`, `"1m30.5s"`, `"200ms"`, `"45s"`, `"1h2m3s"`.
#[must_use]
pub fn parse_go_duration(s: &str) -> Option<f64> {
    let mut total_secs = 0.0_f64;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();
    let mut parsed_any = false;

    while let Some(&ch) = chars.peek() {
        if ch.is_ascii_digit() || ch == '.' {
            num_buf.push(ch);
            chars.next();
            continue;
        }
        chars.next();
        let val: f64 = num_buf.parse().ok()?;
        total_secs += match ch {
            'h' => val * 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                val / 1000.0
            }
            'm' => val * 60.0,
            's' => val,
            _ => return None,
        };
        num_buf.clear();
        parsed_any = true;
    }

    (parsed_any && num_buf.is_empty()).then_some(total_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_go_duration() {
        assert_eq!(parse_go_duration("6m0s"), Some(360.0));
        assert_eq!(parse_go_duration("1m30.5s"), Some(90.5));
        assert_eq!(parse_go_duration("200ms"), Some(0.2));
        assert_eq!(parse_go_duration("2000ms"), Some(2.0));
        assert_eq!(parse_go_duration("45s"), Some(45.0));
        assert_eq!(parse_go_duration("1h2m3s"), Some(3723.0));
        assert_eq!(parse_go_duration("abc"), None);
        assert_eq!(parse_go_duration("12"), None);
        assert_eq!(parse_go_duration(""), None);
    }

    #[test]
    fn test_parse_openai_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit-requests", HeaderValue::from_static("500"));
        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("499"));
        headers.insert("x-ratelimit-limit-tokens", HeaderValue::from_static("30000"));
        headers.insert("x-ratelimit-remaining-tokens", HeaderValue::from_static("29100"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("500ms"));
        headers.insert("x-ratelimit-reset-tokens", HeaderValue::from_static("1m30s"));

        let update = parse_rate_limit_headers(ProviderKind::OpenAi, &headers);
        assert_eq!(update.limit_requests, Some(500));
        assert_eq!(update.remaining_requests, Some(499));
        assert_eq!(update.limit_tokens, Some(30_000));
        assert_eq!(update.remaining_tokens, Some(29_100));
        assert_eq!(update.reset_requests, Some(Duration::from_millis(500)));
        assert_eq!(update.wait_hint(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_parse_anthropic_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "anthropic-ratelimit-requests-limit",
            HeaderValue::from_static("1000"),
        );
        headers.insert(
            "anthropic-ratelimit-requests-remaining",
            HeaderValue::from_static("987"),
        );
        headers.insert(
            "anthropic-ratelimit-tokens-remaining",
            HeaderValue::from_static("45200"),
        );
        headers.insert(
            "anthropic-ratelimit-requests-reset",
            HeaderValue::from_static("2000-01-01T00:00:00Z"),
        );

        let update = parse_rate_limit_headers(ProviderKind::Anthropic, &headers);
        assert_eq!(update.limit_requests, Some(1000));
        assert_eq!(update.remaining_requests, Some(987));
        assert_eq!(update.limit_tokens, None);
        assert_eq!(update.remaining_tokens, Some(45_200));
        // A reset time in the past means the window already rolled over
        assert_eq!(update.reset_requests, Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_variants() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert("retry-after-ms", HeaderValue::from_static("2000"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_rate_limit_wait_falls_back_to_reset_hints() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset-tokens", HeaderValue::from_static("2000ms"));
        assert_eq!(
            rate_limit_wait(ProviderKind::OpenAi, &headers),
            Some(Duration::from_secs(2))
        );
        assert_eq!(rate_limit_wait(ProviderKind::OpenAi, &HeaderMap::new()), None);
    }

    #[test]
    fn test_empty_update() {
        assert!(!RateLimitUpdate::default().has_data());
        assert_eq!(RateLimitUpdate::default().wait_hint(), None);
    }
}
