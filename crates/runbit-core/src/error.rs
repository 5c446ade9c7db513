//! Error types for runbit-core

use runbit_llm::ErrorClass;
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Error raised by normalization or a vendor call
    #[error(transparent)]
    Llm(#[from] runbit_llm::Error),

    /// Transient failures hit the attempt ceiling
    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        #[source]
        last_error: runbit_llm::Error,
    },

    /// Scheduler shut down before the call finished
    #[error("scheduler closed")]
    Closed,
}

impl Error {
    /// Class of the underlying vendor error, if any
    #[must_use]
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Llm(e) | Self::RetryExhausted { last_error: e, .. } => Some(e.class()),
            Self::Closed => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
