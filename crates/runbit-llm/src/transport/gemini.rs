//! Google Gemini `streamGenerateContent`

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
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Finish reasons that end a generation normally
const NORMAL_FINISH: &[&str] = &["STOP", "MAX_TOKENS", "FINISH_REASON_UNSPECIFIED"];

/// Gemini transport configuration
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key
    pub api_key: String,
    /// Base URL
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &mask_api_key(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GeminiConfig {
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
    ///
    /// Reads `GEMINI_API_KEY`, falling back to `GOOGLE_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| Error::NotConfigured("GEMINI_API_KEY not set".to_string()))?;
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
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

/// Gemini streaming transport
pub struct GeminiTransport {
    client: Client,
    config: GeminiConfig,
}

impl GeminiTransport {
    /// Create a new transport
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn convert_messages(messages: &[Message]) -> (Option<Value>, Vec<Value>) {
        let system: Vec<String> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(Message::text)
            .filter(|t| !t.trim().is_empty())
            .collect();

        let turns: Vec<Message> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .cloned()
            .collect();

        let contents = merge_same_role(turns)
            .iter()
            .filter_map(|msg| {
                let parts: Vec<Value> = match &msg.content {
                    MessageContent::Text(text) => vec![json!({ "text": text })],
                    MessageContent::Parts(parts) => parts.iter().filter_map(Self::convert_part).collect(),
                };
                let role = if msg.role == MessageRole::Assistant {
                    "model"
                } else {
                    "user"
                };
                (!parts.is_empty()).then(|| json!({ "role": role, "parts": parts }))
            })
            .collect();

        let system = (!system.is_empty())
            .then(|| json!({ "parts": [{ "text": system.join("\n\n") }] }));
        (system, contents)
    }

    fn convert_part(part: &ContentPart) -> Option<Value> {
        if let ContentPart::Text { text } = part {
            return Some(json!({ "text": text }));
        }
        let media = part.media()?;
        if let Some((mime, data)) = data_url_parts(&media.url) {
            return Some(json!({ "inline_data": { "mime_type": mime, "data": data } }));
        }
        if is_remote(&media.url) {
            let mime = media.mime.as_deref().unwrap_or("application/octet-stream");
            return Some(json!({ "file_data": { "mime_type": mime, "file_uri": media.url } }));
        }
        debug!(url = %media.url, "Unsendable media reference, skipping");
        None
    }
}

#[async_trait]
impl Transport for GeminiTransport {
    fn name(&self) -> &str {
        "gemini"
    }

    fn payload(&self, request: &NormalizedRequest) -> Result<Value> {
        let (system, contents) = Self::convert_messages(request.messages());
        if contents.is_empty() {
            return Err(Error::InvalidRequest(
                "request has no user or model turn".to_string(),
            ));
        }

        let params = request.params();
        let mut generation = Map::new();
        if let Some(t) = params.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if let Some(p) = params.top_p {
            generation.insert("topP".into(), json!(p));
        }
        if let Some(n) = params.n {
            generation.insert("candidateCount".into(), json!(n));
        }
        if let Some(requested) = params.max_tokens {
            let clamped = request
                .profile()
                .max_output_tokens
                .map_or(requested, |ceiling| requested.min(ceiling));
            generation.insert("maxOutputTokens".into(), json!(clamped));
        }
        if params.json_mode {
            generation.insert("responseMimeType".into(), json!("application/json"));
        }

        let mut body = Map::new();
        body.insert("contents".into(), Value::Array(contents));
        if let Some(system) = system {
            body.insert("systemInstruction".into(), system);
        }
        if !generation.is_empty() {
            body.insert("generationConfig".into(), Value::Object(generation));
        }
        Ok(Value::Object(body))
    }

    #[instrument(skip(self, request, payload), fields(model = %request.model()))]
    async fn open(&self, request: &NormalizedRequest, payload: &Value) -> Result<TransportResponse> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url.trim_end_matches('/'),
            request.model()
        );
        debug!("Sending request to Gemini: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http_error(ProviderKind::Gemini, response).await);
        }

        let envelope = ResponseEnvelope::from_parts(response.status().as_u16(), response.headers());
        let rate_limits = Some(quota::parse_rate_limit_headers(
            ProviderKind::Gemini,
            response.headers(),
        ))
        .filter(|u| u.has_data());

        Ok(TransportResponse {
            envelope,
            rate_limits,
            chunks: spawn_sse(response, GeminiFrames),
        })
    }
}

struct GeminiFrames;

impl FrameParser for GeminiFrames {
    fn parse(&mut self, _event: &str, data: &str, chunk: &mut RawChunk) -> Result<()> {
        let frame = parse_json(data)?;

        if let Some(error) = frame.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("stream error");
            return Err(Error::Stream(message.to_string()));
        }

        if let Some(reason) = frame
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            chunk.finish_reason = Some(reason.to_string());
            chunk.blocked = Some(BlockSignal {
                reason: reason.to_string(),
                detail: frame.get("promptFeedback").cloned().unwrap_or(Value::Null),
            });
        }

        if let Some(candidate) = frame.pointer("/candidates/0") {
            if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
                for text in parts.iter().filter_map(|p| p.get("text")?.as_str()) {
                    chunk.text_delta.push_str(text);
                }
            }
            if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                chunk.finish_reason = Some(reason.to_string());
                if !NORMAL_FINISH.contains(&reason) {
                    chunk.blocked = Some(BlockSignal {
                        reason: reason.to_string(),
                        detail: candidate.get("safetyRatings").cloned().unwrap_or(Value::Null),
                    });
                }
            }
        }

        if let Some(usage) = frame.get("usageMetadata") {
            chunk.usage = Some(UsageHint {
                prompt_tokens: usage.get("promptTokenCount").and_then(Value::as_u64),
                completion_tokens: usage.get("candidatesTokenCount").and_then(Value::as_u64),
            })
            .filter(|u| !u.is_empty());
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
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL: &str = "gemini-1.5-flash";

    fn transport(base_url: &str) -> GeminiTransport {
        GeminiTransport::new(GeminiConfig::new("AIza-test-key-0000").with_base_url(base_url)).unwrap()
    }

    async fn request(req: CallRequest) -> NormalizedRequest {
        normalize(&req, &NormalizeOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_payload_roles_and_config() {
        let req = request(
            CallRequest::new(MODEL)
                .with_message(Message::system("Reply in JSON."))
                .with_message(Message::user(vec![
                    ContentPart::text("describe"),
                    ContentPart::Image(MediaRef::new("https://example.com/a.jpg").with_mime("image/jpeg")),
                ]))
                .with_message(Message::assistant("{}"))
                .with_message(Message::user("again, as json"))
                .with_json_mode(true)
                .with_temperature(0.3)
                .with_max_tokens(100_000),
        )
        .await;
        let payload = transport("http://unused").payload(&req).unwrap();

        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], json!("Reply in JSON."));
        let contents = payload["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], json!("user"));
        assert_eq!(contents[1]["role"], json!("model"));
        assert_eq!(contents[0]["parts"][1]["file_data"]["mime_type"], json!("image/jpeg"));

        let config = &payload["generationConfig"];
        assert_eq!(config["temperature"], json!(0.3));
        assert_eq!(config["maxOutputTokens"], json!(8192));
        assert_eq!(config["responseMimeType"], json!("application/json"));
    }

    #[tokio::test]
    async fn test_stream_and_usage() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Bon\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"jour\"}]},\"finishReason\":\"STOP\"}],",
            "\"usageMetadata\":{\"promptTokenCount\":7,\"candidatesTokenCount\":2,\"totalTokenCount\":9}}\n\n",
        );
        Mock::given(method("POST"))
            .and(path(format!("/v1beta/models/{MODEL}:streamGenerateContent")))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "AIza-test-key-0000"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let t = transport(&server.uri());
        let req = request(CallRequest::new(MODEL).with_message(Message::user("hello"))).await;
        let response = t.open(&req, &t.payload(&req).unwrap()).await.unwrap();
        assert!(response.rate_limits.is_none());

        let chunks: Vec<RawChunk> = response.chunks.map(|c| c.unwrap()).collect().await;
        let text: String = chunks.iter().map(|c| c.text_delta.as_str()).collect();
        assert_eq!(text, "Bonjour");
        assert_eq!(
            chunks[1].usage,
            Some(UsageHint {
                prompt_tokens: Some(7),
                completion_tokens: Some(2)
            })
        );
        assert!(chunks[1].blocked.is_none());
    }

    #[tokio::test]
    async fn test_quota_error_carries_retry_delay() {
        let server = MockServer::start().await;
        let body = json!({
            "error": {
                "code": 429,
                "message": "Resource has been exhausted",
                "status": "RESOURCE_EXHAUSTED",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.RetryInfo",
                    "retryDelay": "17s"
                }]
            }
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(body))
            .mount(&server)
            .await;

        let t = transport(&server.uri());
        let req = request(CallRequest::new(MODEL).with_message(Message::user("hello"))).await;
        let err = t.open(&req, &t.payload(&req).unwrap()).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(17)));
    }

    #[test]
    fn test_safety_finish_is_blocked() {
        let mut chunk = RawChunk::default();
        GeminiFrames
            .parse(
                "",
                r#"{"candidates":[{"finishReason":"SAFETY","safetyRatings":[{"category":"HARM_CATEGORY_DANGEROUS_CONTENT","probability":"HIGH"}]}]}"#,
                &mut chunk,
            )
            .unwrap();
        let blocked = chunk.blocked.unwrap();
        assert_eq!(blocked.reason, "SAFETY");
        assert!(blocked.detail.is_array());

        let mut chunk = RawChunk::default();
        GeminiFrames
            .parse("", r#"{"promptFeedback":{"blockReason":"OTHER"}}"#, &mut chunk)
            .unwrap();
        assert_eq!(chunk.blocked.unwrap().reason, "OTHER");

        let mut chunk = RawChunk::default();
        GeminiFrames
            .parse("", r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#, &mut chunk)
            .unwrap();
        assert!(chunk.blocked.is_none());
    }
}
