//! Error types for runbit-llm

use crate::quota::RateLimitUpdate;
use crate::transport::ResponseEnvelope;
use std::time::Duration;
use thiserror::Error;

/// How an error should be handled by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 400-class: the request itself is wrong; never retried
    Malformed,
    /// 429-class: retried after the vendor-informed wait
    RateLimited,
    /// 5xx, network, decode failures; retried up to the attempt ceiling
    Transient,
    /// Raised locally before any network call; never retried
    Policy,
    /// Vendor moderation or abnormal finish; never retried
    Blocked,
}

/// LLM error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// Request rejected locally as malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Non-success HTTP status from the vendor
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Vendor message (sanitized)
        message: String,
    },

    /// Rate limit exceeded
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        /// Wait hint from the vendor, if any
        retry_after: Option<Duration>,
        /// Vendor message
        message: String,
    },

    /// Content blocked by vendor moderation or an abnormal finish reason
    #[error("blocked by provider: {reason}")]
    Blocked {
        /// Block or finish reason reported by the vendor
        reason: String,
        /// Raw vendor diagnostic payload
        detail: serde_json::Value,
    },

    /// Local file access attempted without permission
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Media reference could not be resolved
    #[error("media error: {0}")]
    Media(String),

    /// Invalid response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Stream broke after it was opened
    #[error("stream error: {0}")]
    Stream(String),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// History store I/O failure
    #[error("history error: {0}")]
    History(String),

    /// Non-success response, kept with its status and headers
    #[error("{error}")]
    Http {
        /// Status and headers of the response
        envelope: Box<ResponseEnvelope>,
        /// Rate-limit values reported by the failed response
        rate_limits: Option<RateLimitUpdate>,
        /// The classified failure
        error: Box<Error>,
    },
}

impl Error {
    /// Classify the error for retry handling
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotConfigured(_) | Self::InvalidRequest(_) => ErrorClass::Malformed,
            Self::Api { status, .. } => classify_http_status(*status),
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::Blocked { .. } => ErrorClass::Blocked,
            Self::PolicyViolation(_) | Self::Media(_) => ErrorClass::Policy,
            Self::InvalidResponse(_)
            | Self::Stream(_)
            | Self::Network(_)
            | Self::Timeout(_)
            | Self::History(_) => ErrorClass::Transient,
            Self::Http { error, .. } => error.class(),
        }
    }

    /// Wait hint carried by a rate-limit error
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            Self::Http { error, .. } => error.retry_after(),
            _ => None,
        }
    }

    /// The classified failure, without the response wrapper
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Self::Http { error, .. } => error.root(),
            other => other,
        }
    }

    /// Status and headers of the failed response, if the vendor answered
    #[must_use]
    pub fn envelope(&self) -> Option<&ResponseEnvelope> {
        match self {
            Self::Http { envelope, .. } => Some(&**envelope),
            _ => None,
        }
    }

    /// Rate-limit values reported by the failed response
    #[must_use]
    pub fn rate_limits(&self) -> Option<&RateLimitUpdate> {
        match self {
            Self::Http { rate_limits, .. } => rate_limits.as_ref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(0)
        } else if let Some(status) = e.status() {
            Self::Api {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Map an HTTP status to an error class
#[must_use]
pub fn classify_http_status(status: u16) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimited,
        408 => ErrorClass::Transient,
        400..=499 => ErrorClass::Malformed,
        _ => ErrorClass::Transient,
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
