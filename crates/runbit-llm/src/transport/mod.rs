//! Vendor transports
//!
//! Every vendor family implements [`Transport`]: it builds the wire payload
//! for a [`NormalizedRequest`], opens the streaming call and adapts the
//! vendor's frames into uniform [`RawChunk`] records. Vendor quirks such as
//! system-role folding, output ceilings and in-band usage stay behind this
//! seam.

mod anthropic;
mod gemini;
mod mock;
mod openai;

pub use anthropic::{AnthropicConfig, AnthropicTransport};
pub use gemini::{GeminiConfig, GeminiTransport};
pub use mock::{Reply, ScriptedTransport, Step};
pub use openai::{OpenAiConfig, OpenAiTransport};

use crate::cost::UsageHint;
use crate::error::{Error, Result};
use crate::models::ProviderKind;
use crate::normalize::NormalizedRequest;
use crate::quota::{self, RateLimitUpdate};
use crate::util::sanitize_api_error;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Buffered chunks between the reader task and the consumer
const CHUNK_BUFFER: usize = 100;

/// Vendor content-safety signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSignal {
    /// Block or finish reason as reported
    pub reason: String,
    /// Vendor diagnostic payload
    pub detail: serde_json::Value,
}

impl From<BlockSignal> for Error {
    fn from(signal: BlockSignal) -> Self {
        Error::Blocked {
            reason: signal.reason,
            detail: signal.detail,
        }
    }
}

/// One adapted transport frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChunk {
    /// Raw frame as received
    pub frame: String,
    /// Text carried by the frame
    pub text_delta: String,
    /// In-band usage, if reported
    pub usage: Option<UsageHint>,
    /// Finish reason, if reported
    pub finish_reason: Option<String>,
    /// Content-safety signal, if raised
    pub blocked: Option<BlockSignal>,
}

impl RawChunk {
    /// A chunk carrying only text
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        let text_delta = delta.into();
        Self {
            frame: text_delta.clone(),
            text_delta,
            ..Self::default()
        }
    }
}

/// Stream of adapted chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<RawChunk>> + Send>>;

/// Response status and headers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
}

impl ResponseEnvelope {
    /// Capture status and headers of a response
    #[must_use]
    pub fn from_parts(status: u16, headers: &HeaderMap) -> Self {
        let headers = headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or("<binary>").to_string(),
                )
            })
            .collect();
        Self { status, headers }
    }
}

/// An opened streaming call
pub struct TransportResponse {
    /// Status and headers
    pub envelope: ResponseEnvelope,
    /// Rate-limit values from the headers
    pub rate_limits: Option<RateLimitUpdate>,
    /// Adapted frames
    pub chunks: ChunkStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("envelope", &self.envelope)
            .field("rate_limits", &self.rate_limits)
            .finish_non_exhaustive()
    }
}

/// A vendor wire family
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Build the vendor request body
    fn payload(&self, request: &NormalizedRequest) -> Result<serde_json::Value>;

    /// Send the body and open the stream
    async fn open(&self, request: &NormalizedRequest, payload: &serde_json::Value) -> Result<TransportResponse>;
}

/// Transports by vendor family
#[derive(Clone, Default)]
pub struct Transports {
    by_provider: HashMap<ProviderKind, Arc<dyn Transport>>,
    fallback: Option<Arc<dyn Transport>>,
}

impl Transports {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport for a vendor family
    #[must_use]
    pub fn with(mut self, provider: ProviderKind, transport: Arc<dyn Transport>) -> Self {
        self.by_provider.insert(provider, transport);
        self
    }

    /// Transport used for families without a registration
    #[must_use]
    pub fn with_fallback(mut self, transport: Arc<dyn Transport>) -> Self {
        self.fallback = Some(transport);
        self
    }

    /// Transport for a vendor family
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] when nothing serves the family.
    pub fn get(&self, provider: ProviderKind) -> Result<Arc<dyn Transport>> {
        self.by_provider
            .get(&provider)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| Error::NotConfigured(provider.to_string()))
    }

    /// Registered vendor families
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.by_provider.keys().copied().collect()
    }
}

impl std::fmt::Debug for Transports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: BTreeMap<_, _> = self
            .by_provider
            .iter()
            .map(|(k, v)| (k.as_str(), v.name().to_string()))
            .collect();
        f.debug_struct("Transports")
            .field("by_provider", &names)
            .field("fallback", &self.fallback.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

/// Adapts one SSE frame into a chunk
pub(crate) trait FrameParser: Send + 'static {
    /// Fill `chunk` from the frame's event name and data
    fn parse(&mut self, event: &str, data: &str, chunk: &mut RawChunk) -> Result<()>;
}

/// Read an SSE body on a spawned task and forward adapted chunks
pub(crate) fn spawn_sse<P: FrameParser>(response: reqwest::Response, mut parser: P) -> ChunkStream {
    let (tx, rx) = mpsc::channel::<Result<RawChunk>>(CHUNK_BUFFER);
    let stream = response.bytes_stream().eventsource();

    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    let _ = tx.send(Err(Error::Stream(e.to_string()))).await;
                    break;
                }
            };
            if event.data.is_empty() || event.data == "[DONE]" {
                continue;
            }

            let mut chunk = RawChunk {
                frame: event.data.clone(),
                ..RawChunk::default()
            };
            if let Err(e) = parser.parse(&event.event, &event.data, &mut chunk) {
                debug!(error = %e, "Failed to adapt stream frame");
                let _ = tx.send(Err(e)).await;
                break;
            }
            if tx.send(Ok(chunk)).await.is_err() {
                break;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Split a base64 `data:` URL into MIME type and payload
pub(crate) fn data_url_parts(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, data))
}

/// Whether a URL can be sent to a vendor as-is
pub(crate) fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Convert a non-success response into a classified error
///
/// The result is an [`Error::Http`] keeping the status, the headers and any
/// rate-limit values the vendor reported with the failure.
pub(crate) async fn http_error(provider: ProviderKind, response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let envelope = ResponseEnvelope::from_parts(status, &headers);
    let rate_limits =
        Some(quota::parse_rate_limit_headers(provider, &headers)).filter(RateLimitUpdate::has_data);
    let body = response.text().await.unwrap_or_default();
    let error = classify_failure(provider, status, &headers, &body);
    Error::Http {
        envelope: Box::new(envelope),
        rate_limits,
        error: Box::new(error),
    }
}

fn classify_failure(provider: ProviderKind, status: u16, headers: &HeaderMap, body: &str) -> Error {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();

    let message = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/message"))
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| format!("HTTP {status}: {body}"), str::to_string);
    let message = sanitize_api_error(&message);

    if status == 429 {
        let retry_after = quota::rate_limit_wait(provider, headers)
            .or_else(|| parsed.as_ref().and_then(retry_delay_from_body));
        return Error::RateLimited {
            retry_after,
            message,
        };
    }

    let code = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/code"))
        .and_then(serde_json::Value::as_str);
    if let (Some(code @ ("content_policy_violation" | "content_filter")), Some(detail)) = (code, &parsed) {
        return Error::Blocked {
            reason: code.to_string(),
            detail: detail.clone(),
        };
    }

    Error::Api { status, message }
}

/// `RetryInfo.retryDelay` from a Google-style error body
fn retry_delay_from_body(body: &serde_json::Value) -> Option<std::time::Duration> {
    body.pointer("/error/details")?
        .as_array()?
        .iter()
        .filter_map(|d| d.get("retryDelay")?.as_str())
        .find_map(quota::parse_reset)
}

/// Parse a frame as JSON
pub(crate) fn parse_json(data: &str) -> Result<serde_json::Value> {
    serde_json::from_str(data).map_err(|e| Error::InvalidResponse(format!("undecodable frame: {e}")))
}
