//! Anthropic Messages API
//!
//! System messages are lifted into the top-level `system` field, and the
//! remaining turns are re-merged so roles alternate.

use super::{
    data_url_parts, http_error, is_remote, parse_json, spawn_sse, BlockSignal, FrameParser,
    RawChunk, ResponseEnvelope, Transport, TransportResponse,
};
use crate::cost::UsageHint;
use crate::error::{Error, Result};
use crate::message::{ContentPart, Message, MessageContent, MessageRole};
use crate::models::ProviderKind;
use crate::normalize::{merge_same_role, NormalizedRequest};
use crate::quota;
use crate::util::mask_api_key;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Anthropic API version
const API_VERSION: &str = "2023-06-01";

/// Default API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// `max_tokens` is mandatory on this API
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic transport configuration
#[derive(Clone)]
pub struct AnthropicConfig {
    /// API key
    pub api_key: String,
    /// Base URL
    pub base_url: String,
    /// Max tokens when the request sets none
    pub default_max_tokens: u32,
    /// Request timeout
    pub timeout: Duration,
}

impl fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &mask_api_key(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AnthropicConfig {
    /// Create a new configuration with an API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(120),
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| Error::NotConfigured("ANTHROPIC_API_KEY not set".to_string()))?;
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(api_key).with_base_url(base_url))
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: BlockSource },
    Document { source: BlockSource },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Anthropic streaming transport
pub struct AnthropicTransport {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicTransport {
    /// Create a new transport
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Split out system text and convert the remaining turns
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts = Vec::new();
        let mut turns = Vec::new();

        for msg in messages {
            if msg.role == MessageRole::System {
                let text = msg.text();
                if !text.trim().is_empty() {
                    system_parts.push(text);
                }
            } else {
                turns.push(msg.clone());
            }
        }

        let converted = merge_same_role(turns)
            .iter()
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    MessageRole::Assistant => "assistant",
                    _ => "user",
                },
                content: Self::convert_content(&msg.content),
            })
            .filter(|m| !m.content.is_empty())
            .collect();

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, converted)
    }

    fn convert_content(content: &MessageContent) -> Vec<ContentBlock> {
        match content {
            MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            MessageContent::Parts(parts) => parts.iter().filter_map(Self::convert_part).collect(),
        }
    }

    fn convert_part(part: &ContentPart) -> Option<ContentBlock> {
        match part {
            ContentPart::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
            ContentPart::Image(media) => Some(ContentBlock::Image {
                source: Self::source(&media.url)?,
            }),
            ContentPart::File(media) => {
                let pdf = media.mime.as_deref() == Some("application/pdf")
                    || data_url_parts(&media.url).is_some_and(|(mime, _)| mime == "application/pdf");
                if !pdf {
                    debug!(name = ?media.name, "Only PDF documents are forwarded, skipping file");
                    return None;
                }
                Some(ContentBlock::Document {
                    source: Self::source(&media.url)?,
                })
            }
            ContentPart::Audio(_) | ContentPart::Video(_) => {
                debug!("Audio and video parts are not accepted by Messages API, skipping");
                None
            }
        }
    }

    fn source(url: &str) -> Option<BlockSource> {
        if let Some((mime, data)) = data_url_parts(url) {
            return Some(BlockSource::Base64 {
                media_type: mime.to_string(),
                data: data.to_string(),
            });
        }
        is_remote(url).then(|| BlockSource::Url {
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Transport for AnthropicTransport {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn payload(&self, request: &NormalizedRequest) -> Result<Value> {
        let (system, messages) = Self::convert_messages(request.messages());
        if messages.is_empty() {
            return Err(Error::InvalidRequest(
                "request has no user or assistant message".to_string(),
            ));
        }

        let params = request.params();
        let requested = params.max_tokens.unwrap_or(self.config.default_max_tokens);
        let max_tokens = request
            .profile()
            .max_output_tokens
            .map_or(requested, |ceiling| requested.min(ceiling));

        let body = AnthropicRequest {
            model: request.model().to_string(),
            messages,
            system,
            max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stream: true,
        };
        serde_json::to_value(body).map_err(|e| Error::InvalidRequest(e.to_string()))
    }

    #[instrument(skip(self, request, payload), fields(model = %request.model()))]
    async fn open(&self, request: &NormalizedRequest, payload: &Value) -> Result<TransportResponse> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        debug!("Sending request to Anthropic: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http_error(ProviderKind::Anthropic, response).await);
        }

        let envelope = ResponseEnvelope::from_parts(response.status().as_u16(), response.headers());
        let rate_limits =
            Some(quota::parse_anthropic_headers(response.headers())).filter(|u| u.has_data());

        Ok(TransportResponse {
            envelope,
            rate_limits,
            chunks: spawn_sse(response, AnthropicFrames),
        })
    }
}

struct AnthropicFrames;

impl FrameParser for AnthropicFrames {
    fn parse(&mut self, event: &str, data: &str, chunk: &mut RawChunk) -> Result<()> {
        let frame = parse_json(data)?;
        let kind = frame
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(event);

        match kind {
            "message_start" => {
                if let Some(usage) = frame.pointer("/message/usage") {
                    chunk.usage = Some(UsageHint {
                        prompt_tokens: usage.get("input_tokens").and_then(Value::as_u64),
                        completion_tokens: usage.get("output_tokens").and_then(Value::as_u64),
                    });
                }
            }
            "content_block_delta" => {
                if let Some(text) = frame.pointer("/delta/text").and_then(Value::as_str) {
                    chunk.text_delta.push_str(text);
                }
            }
            "message_delta" => {
                if let Some(reason) = frame.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    chunk.finish_reason = Some(reason.to_string());
                    if reason == "refusal" {
                        chunk.blocked = Some(BlockSignal {
                            reason: reason.to_string(),
                            detail: frame.clone(),
                        });
                    }
                }
                if let Some(output) = frame.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    chunk.usage = Some(UsageHint {
                        prompt_tokens: None,
                        completion_tokens: Some(output),
                    });
                }
            }
            "error" => {
                let message = frame
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string();
                let error_type = frame.pointer("/error/type").and_then(Value::as_str);
                return Err(match error_type {
                    Some("rate_limit_error") => Error::RateLimited {
                        retry_after: None,
                        message,
                    },
                    _ => Error::Stream(message),
                });
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MediaRef;
    use crate::normalize::{normalize, NormalizeOptions};
    use crate::request::CallRequest;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(base_url: &str) -> AnthropicTransport {
        AnthropicTransport::new(AnthropicConfig::new("sk-ant-test-123456").with_base_url(base_url))
            .unwrap()
    }

    async fn request(messages: Vec<Message>) -> NormalizedRequest {
        let req = CallRequest::new("claude-3-5-sonnet-20241022").with_messages(messages);
        normalize(&req, &NormalizeOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_system_messages_folded() {
        let req = request(vec![
            Message::system("You are terse."),
            Message::user("first"),
            Message::system("Answer in English."),
            Message::user("second"),
        ])
        .await;
        let payload = transport("http://unused").payload(&req).unwrap();

        assert_eq!(payload["system"], json!("You are terse.\n\nAnswer in English."));
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], json!("user"));
        assert_eq!(messages[0]["content"].as_array().unwrap().len(), 2);
        assert_eq!(payload["max_tokens"], json!(DEFAULT_MAX_TOKENS));
        assert_eq!(payload["stream"], json!(true));
    }

    #[tokio::test]
    async fn test_image_and_pdf_blocks() {
        let req = request(vec![Message::user(vec![
            ContentPart::text("compare"),
            ContentPart::Image(MediaRef::new("https://example.com/chart.png")),
            ContentPart::File(
                MediaRef::new("data:application/pdf;base64,JVBERi0=").with_mime("application/pdf"),
            ),
        ])])
        .await;
        let payload = transport("http://unused").payload(&req).unwrap();
        let blocks = &payload["messages"][0]["content"];

        assert_eq!(blocks[1]["type"], json!("image"));
        assert_eq!(blocks[1]["source"]["type"], json!("url"));
        assert_eq!(blocks[2]["type"], json!("document"));
        assert_eq!(blocks[2]["source"]["media_type"], json!("application/pdf"));
    }

    #[tokio::test]
    async fn test_max_tokens_clamped() {
        let req = CallRequest::new("claude-3-5-sonnet-20241022")
            .with_message(Message::user("hi"))
            .with_max_tokens(200_000);
        let req = normalize(&req, &NormalizeOptions::default()).await.unwrap();
        let payload = transport("http://unused").payload(&req).unwrap();
        assert_eq!(payload["max_tokens"], json!(8192));
    }

    #[tokio::test]
    async fn test_system_only_is_rejected() {
        let req = request(vec![Message::system("nothing else")]).await;
        let err = transport("http://unused").payload(&req).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_stream_events() {
        let server = MockServer::start().await;
        let sse = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi there\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test-123456"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("anthropic-ratelimit-requests-remaining", "49")
                    .set_body_raw(sse, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let t = transport(&server.uri());
        let req = request(vec![Message::user("hello")]).await;
        let response = t.open(&req, &t.payload(&req).unwrap()).await.unwrap();
        assert_eq!(response.rate_limits.unwrap().remaining_requests, Some(49));

        let chunks: Vec<RawChunk> = response.chunks.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].usage.unwrap().prompt_tokens, Some(25));
        assert_eq!(chunks[2].text_delta, "Hi there");
        assert_eq!(chunks[3].finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(chunks[3].usage.unwrap().completion_tokens, Some(3));
        assert!(chunks.iter().all(|c| c.blocked.is_none()));
    }

    #[tokio::test]
    async fn test_overloaded_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_raw(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let t = transport(&server.uri());
        let req = request(vec![Message::user("hello")]).await;
        let err = t.open(&req, &t.payload(&req).unwrap()).await.unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Transient);
    }

    #[test]
    fn test_refusal_and_error_frames() {
        let mut chunk = RawChunk::default();
        AnthropicFrames
            .parse(
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"refusal"}}"#,
                &mut chunk,
            )
            .unwrap();
        assert_eq!(chunk.blocked.unwrap().reason, "refusal");

        let err = AnthropicFrames
            .parse(
                "error",
                r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#,
                &mut RawChunk::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));

        let err = AnthropicFrames
            .parse(
                "error",
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                &mut RawChunk::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[test]
    fn test_config_debug_masks_key() {
        let debug = format!("{:?}", AnthropicConfig::new("sk-ant-REDACTED"));
        assert!(!debug.contains("secret"));
    }
}
