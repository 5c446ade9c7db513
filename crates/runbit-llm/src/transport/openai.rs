//! OpenAI-compatible chat completions
//!
//! Token-streaming SSE with `stream_options.include_usage`, so the final
//! frame carries authoritative usage.

use super::{
    data_url_parts, http_error, is_remote, parse_json, spawn_sse, FrameParser, RawChunk,
    ResponseEnvelope, Transport, TransportResponse,
};
use crate::cost::UsageHint;
use crate::error::{Error, Result};
use crate::message::{ContentPart, ImageDetail, Message, MessageContent};
use crate::models::ProviderKind;
use crate::normalize::NormalizedRequest;
use crate::quota;
use crate::util::mask_api_key;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model families that take `max_completion_tokens` instead of `max_tokens`
const COMPLETION_TOKENS_FAMILIES: &[&str] = &["o1", "o3", "o4", "gpt-5"];

/// OpenAI transport configuration
#[derive(Clone)]
pub struct OpenAiConfig {
    /// API key
    pub api_key: String,
    /// Base URL
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &mask_api_key(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiConfig {
    /// Create a new configuration with an API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::NotConfigured("OPENAI_API_KEY not set".to_string()))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(api_key).with_base_url(base_url))
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// OpenAI-compatible streaming transport
pub struct OpenAiTransport {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiTransport {
    /// Create a new transport
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn convert_message(message: &Message) -> Value {
        let content = match &message.content {
            MessageContent::Text(text) => Value::String(text.clone()),
            MessageContent::Parts(parts) => {
                Value::Array(parts.iter().filter_map(Self::convert_part).collect())
            }
        };
        json!({ "role": message.role.as_str(), "content": content })
    }

    fn convert_part(part: &ContentPart) -> Option<Value> {
        match part {
            ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
            ContentPart::Image(media) => {
                if !is_remote(&media.url) && data_url_parts(&media.url).is_none() {
                    return None;
                }
                let detail = match media.detail {
                    ImageDetail::Low => "low",
                    ImageDetail::High => "high",
                };
                Some(json!({
                    "type": "image_url",
                    "image_url": { "url": media.url, "detail": detail }
                }))
            }
            ContentPart::Audio(media) => {
                let (mime, data) = data_url_parts(&media.url)?;
                let format = if mime.contains("mpeg") || mime.contains("mp3") {
                    "mp3"
                } else {
                    "wav"
                };
                Some(json!({
                    "type": "input_audio",
                    "input_audio": { "data": data, "format": format }
                }))
            }
            ContentPart::File(media) => {
                data_url_parts(&media.url)?;
                Some(json!({
                    "type": "file",
                    "file": {
                        "filename": media.name.clone().unwrap_or_else(|| "attachment".to_string()),
                        "file_data": media.url
                    }
                }))
            }
            ContentPart::Video(_) => {
                debug!("Video parts are not accepted by chat completions, skipping");
                None
            }
        }
    }
}

#[async_trait]
impl Transport for OpenAiTransport {
    fn name(&self) -> &str {
        "openai"
    }

    fn payload(&self, request: &NormalizedRequest) -> Result<Value> {
        let profile = request.profile();
        let params = request.params();

        let mut body = Map::new();
        body.insert("model".into(), json!(request.model()));
        body.insert(
            "messages".into(),
            Value::Array(request.messages().iter().map(Self::convert_message).collect()),
        );
        body.insert("stream".into(), json!(true));
        body.insert("stream_options".into(), json!({ "include_usage": true }));

        if let Some(t) = params.temperature {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(p) = params.top_p {
            body.insert("top_p".into(), json!(p));
        }
        if let Some(n) = params.n {
            body.insert("n".into(), json!(n));
        }
        if let Some(requested) = params.max_tokens {
            let clamped = profile
                .max_output_tokens
                .map_or(requested, |ceiling| requested.min(ceiling));
            let field = if COMPLETION_TOKENS_FAMILIES
                .iter()
                .any(|f| request.model().starts_with(f))
            {
                "max_completion_tokens"
            } else {
                "max_tokens"
            };
            body.insert(field.into(), json!(clamped));
        }
        if params.json_mode {
            body.insert("response_format".into(), json!({ "type": "json_object" }));
        }

        Ok(Value::Object(body))
    }

    #[instrument(skip(self, request, payload), fields(model = %request.model()))]
    async fn open(&self, request: &NormalizedRequest, payload: &Value) -> Result<TransportResponse> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!("Sending request to OpenAI: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http_error(ProviderKind::OpenAi, response).await);
        }

        let envelope = ResponseEnvelope::from_parts(response.status().as_u16(), response.headers());
        let rate_limits = Some(quota::parse_openai_headers(response.headers())).filter(|u| u.has_data());

        Ok(TransportResponse {
            envelope,
            rate_limits,
            chunks: spawn_sse(response, OpenAiFrames),
        })
    }
}

/// Finish reasons that end a reply abnormally; `length` is a normal truncation
const BLOCKED_FINISH: &[&str] = &["content_filter"];

struct OpenAiFrames;

impl FrameParser for OpenAiFrames {
    fn parse(&mut self, _event: &str, data: &str, chunk: &mut RawChunk) -> Result<()> {
        let frame = parse_json(data)?;

        if let Some(error) = frame.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("stream error");
            return Err(Error::Stream(message.to_string()));
        }

        if let Some(choice) = frame.pointer("/choices/0") {
            if let Some(text) = choice.pointer("/delta/content").and_then(Value::as_str) {
                chunk.text_delta.push_str(text);
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                chunk.finish_reason = Some(reason.to_string());
                if BLOCKED_FINISH.contains(&reason) {
                    chunk.blocked = Some(super::BlockSignal {
                        reason: reason.to_string(),
                        detail: choice.clone(),
                    });
                }
            }
        }

        if let Some(usage) = frame.get("usage").filter(|u| !u.is_null()) {
            chunk.usage = Some(UsageHint {
                prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
                completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
            });
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
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn request(model: &str) -> NormalizedRequest {
        let req = CallRequest::new(model)
            .with_message(Message::system("be brief"))
            .with_message(Message::user(vec![
                ContentPart::text("what is this"),
                ContentPart::Image(MediaRef::new("https://example.com/x.png").with_detail(ImageDetail::Low)),
            ]))
            .with_max_tokens(1_000_000)
            .with_json_mode(true);
        normalize(&req, &NormalizeOptions::default()).await.unwrap()
    }

    fn transport(base_url: &str) -> OpenAiTransport {
        OpenAiTransport::new(OpenAiConfig::new("sk-test-key-123456").with_base_url(base_url)).unwrap()
    }

    #[tokio::test]
    async fn test_payload_shape() {
        let req = request("gpt-4o").await;
        let payload = transport("http://unused").payload(&req).unwrap();

        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["stream_options"]["include_usage"], json!(true));
        assert_eq!(payload["max_tokens"], json!(16384));
        assert_eq!(payload["response_format"]["type"], json!("json_object"));
        assert_eq!(payload["messages"][0]["role"], json!("system"));
        assert_eq!(payload["messages"][1]["content"][1]["type"], json!("image_url"));
        assert_eq!(payload["messages"][1]["content"][1]["image_url"]["detail"], json!("low"));
    }

    #[tokio::test]
    async fn test_reasoning_models_use_completion_tokens_field() {
        let req = CallRequest::new("o3-mini")
            .with_message(Message::user("hi"))
            .with_max_tokens(500);
        let req = normalize(&req, &NormalizeOptions::default()).await.unwrap();
        let payload = transport("http://unused").payload(&req).unwrap();
        assert_eq!(payload["max_completion_tokens"], json!(500));
        assert!(payload.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn test_stream_adapts_deltas_and_usage() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test-key-123456"))
            .and(body_partial_json(json!({ "stream": true })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-remaining-requests", "42")
                    .set_body_raw(sse, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let t = transport(&server.uri());
        let req = request("gpt-4o").await;
        let payload = t.payload(&req).unwrap();
        let response = t.open(&req, &payload).await.unwrap();
        assert_eq!(response.envelope.status, 200);
        assert_eq!(response.rate_limits.unwrap().remaining_requests, Some(42));

        let chunks: Vec<RawChunk> = response
            .chunks
            .map(|c| c.unwrap())
            .collect()
            .await;
        let text: String = chunks.iter().map(|c| c.text_delta.as_str()).collect();
        assert_eq!(text, "Hello");
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[2].finish_reason.as_deref(), Some("stop"));
        assert_eq!(
            chunks[3].usage,
            Some(UsageHint {
                prompt_tokens: Some(12),
                completion_tokens: Some(2)
            })
        );
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("x-ratelimit-limit-requests", "500")
                    .insert_header("x-ratelimit-remaining-requests", "0")
                    .insert_header("x-ratelimit-reset-requests", "2000ms")
                    .set_body_raw(
                        r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#,
                        "application/json",
                    ),
            )
            .mount(&server)
            .await;

        let t = transport(&server.uri());
        let req = request("gpt-4o").await;
        let err = t.open(&req, &t.payload(&req).unwrap()).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(err.class(), crate::error::ErrorClass::RateLimited);

        let limits = err.rate_limits().unwrap();
        assert_eq!(limits.limit_requests, Some(500));
        assert_eq!(limits.remaining_requests, Some(0));
        let envelope = err.envelope().unwrap();
        assert_eq!(envelope.status, 429);
        assert_eq!(envelope.headers["x-ratelimit-remaining-requests"], "0");
    }

    #[tokio::test]
    async fn test_bad_request_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                r#"{"error":{"message":"Unrecognized request argument","code":null}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let t = transport(&server.uri());
        let req = request("gpt-4o").await;
        let err = t.open(&req, &t.payload(&req).unwrap()).await.unwrap_err();
        assert!(matches!(err.root(), Error::Api { status: 400, .. }));
        assert!(err.rate_limits().is_none());
        assert_eq!(err.class(), crate::error::ErrorClass::Malformed);
    }

    #[test]
    fn test_content_filter_frame_is_blocked() {
        let mut chunk = RawChunk::default();
        OpenAiFrames
            .parse(
                "",
                r#"{"choices":[{"index":0,"delta":{},"finish_reason":"content_filter"}]}"#,
                &mut chunk,
            )
            .unwrap();
        assert_eq!(chunk.blocked.unwrap().reason, "content_filter");
    }

    #[test]
    fn test_length_finish_is_not_blocked() {
        let mut chunk = RawChunk::default();
        OpenAiFrames
            .parse(
                "",
                r#"{"choices":[{"index":0,"delta":{"content":"cut"},"finish_reason":"length"}]}"#,
                &mut chunk,
            )
            .unwrap();
        assert_eq!(chunk.finish_reason.as_deref(), Some("length"));
        assert_eq!(chunk.text_delta, "cut");
        assert!(chunk.blocked.is_none());
    }

    #[test]
    fn test_config_debug_masks_key() {
        let config = OpenAiConfig::new("sk-1234567890abcdef");
        let debug = format!("{config:?}");
        assert!(debug.contains("sk-1...cdef"));
        assert!(!debug.contains("567890"));
    }
}
