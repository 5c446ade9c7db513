//! Runbit LLM - vendor calls and token accounting
//!
//! This crate provides the per-call half of runbit:
//! - Models: registry of model-class keys, rates and default budgets
//! - Normalize: provider-safe rewriting of chat requests and media
//! - Cost: tokenizer-based estimates and per-call token/cost accumulation
//! - Transport: streaming OpenAI, Anthropic and Gemini wire families
//! - Quota: rate-limit header parsing
//! - History: per-attempt request/response artifacts on disk

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cost;
pub mod error;
pub mod history;
pub mod message;
pub mod models;
pub mod normalize;
pub mod quota;
pub mod request;
pub mod token;
pub mod transport;
pub mod util;

pub use cost::{calc_cost, estimate_prompt_tokens, TokenCount, UsageHint};
pub use error::{classify_http_status, Error, ErrorClass, Result};
pub use history::{AttemptKey, AttemptLog, HistoryStore};
pub use message::{ContentPart, ImageDetail, MediaRef, Message, MessageContent, MessageRole};
pub use models::{ModelProfile, ProviderKind, TokenizerKind};
pub use normalize::{normalize, NormalizeOptions, NormalizedRequest};
pub use quota::{parse_rate_limit_headers, RateLimitUpdate};
pub use request::{CallRequest, GenerationParams, RawParams};
pub use token::TokenCounter;
pub use transport::{
    AnthropicConfig, AnthropicTransport, GeminiConfig, GeminiTransport, OpenAiConfig,
    OpenAiTransport, RawChunk, Reply, ScriptedTransport, Step, Transport, TransportResponse,
    Transports,
};
