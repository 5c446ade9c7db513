//! Scripted transport for testing
//!
//! Plays back queued [`Step`]s in order. When the queue runs dry it uses
//! the fallback, or replies `"mock response"`.

use super::{BlockSignal, ChunkStream, RawChunk, ResponseEnvelope, Transport, TransportResponse};
use crate::cost::UsageHint;
use crate::error::{Error, Result};
use crate::normalize::NormalizedRequest;
use crate::quota::RateLimitUpdate;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

type Fallback = Box<dyn Fn(&NormalizedRequest) -> Step + Send + Sync>;

/// One scripted outcome of `open`
#[derive(Debug)]
pub enum Step {
    /// Open successfully and stream the reply
    Reply(Reply),
    /// Fail before the stream opens
    Fail(Error),
}

impl From<Reply> for Step {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

impl From<Error> for Step {
    fn from(error: Error) -> Self {
        Self::Fail(error)
    }
}

/// A scripted streaming reply
#[derive(Debug, Default)]
pub struct Reply {
    deltas: Vec<String>,
    usage: Option<UsageHint>,
    rate_limits: Option<RateLimitUpdate>,
    finish_reason: Option<String>,
    blocked: Option<BlockSignal>,
    stream_error: Option<Error>,
    gate: Option<oneshot::Receiver<()>>,
    latency: Option<Duration>,
}

impl Reply {
    /// A reply streaming the given text as one delta
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::deltas([text.into()])
    }

    /// A reply streaming each item as its own delta
    #[must_use]
    pub fn deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deltas: deltas.into_iter().map(Into::into).collect(),
            finish_reason: Some("stop".to_string()),
            ..Self::default()
        }
    }

    /// Report usage on the final chunk
    #[must_use]
    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = Some(UsageHint {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
        });
        self
    }

    /// Rate-limit values delivered with the response headers
    #[must_use]
    pub fn with_rate_limits(mut self, update: RateLimitUpdate) -> Self {
        self.rate_limits = Some(update);
        self
    }

    /// End with a content-safety block instead of a normal finish
    #[must_use]
    pub fn blocked(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.finish_reason = Some(reason.clone());
        self.blocked = Some(BlockSignal {
            reason,
            detail: Value::Null,
        });
        self
    }

    /// Break the stream with an error after the deltas
    #[must_use]
    pub fn then_fail(mut self, error: Error) -> Self {
        self.stream_error = Some(error);
        self
    }

    /// Hold the final chunk until the sender fires or is dropped
    #[must_use]
    pub fn gated(mut self, gate: oneshot::Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sleep before the final chunk
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn into_stream(mut self) -> ChunkStream {
        let (tx, rx) = mpsc::channel::<Result<RawChunk>>(self.deltas.len() + 2);

        tokio::spawn(async move {
            let last = self.deltas.pop();
            for delta in self.deltas.drain(..) {
                if tx.send(Ok(RawChunk::text(delta))).await.is_err() {
                    return;
                }
            }
            if let Some(gate) = self.gate.take() {
                let _ = gate.await;
            }
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if let Some(error) = self.stream_error.take() {
                if let Some(delta) = last {
                    let _ = tx.send(Ok(RawChunk::text(delta))).await;
                }
                let _ = tx.send(Err(error)).await;
                return;
            }

            let mut chunk = RawChunk::text(last.unwrap_or_default());
            chunk.usage = self.usage;
            chunk.finish_reason = self.finish_reason.take();
            chunk.blocked = self.blocked.take();
            let _ = tx.send(Ok(chunk)).await;
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// A transport that plays back scripted steps
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Fallback>,
    opened: Mutex<Vec<String>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Create an empty script
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: None,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Produce steps with a closure once the queue is empty
    #[must_use]
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&NormalizedRequest) -> Step + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Queue a step
    pub fn push(&self, step: impl Into<Step>) {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step.into());
    }

    /// Labels (or models, for unlabelled requests) in the order calls opened
    #[must_use]
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of calls opened so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_step(&self, request: &NormalizedRequest) -> Step {
        let queued = self
            .steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match (queued, &self.fallback) {
            (Some(step), _) => step,
            (None, Some(fallback)) => fallback(request),
            (None, None) => Step::Reply(Reply::text("mock response")),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn payload(&self, request: &NormalizedRequest) -> Result<Value> {
        serde_json::to_value(request).map_err(|e| Error::InvalidRequest(e.to_string()))
    }

    async fn open(&self, request: &NormalizedRequest, _payload: &Value) -> Result<TransportResponse> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.label().unwrap_or(request.model()).to_string());

        match self.next_step(request) {
            Step::Fail(error) => Err(error),
            Step::Reply(reply) => Ok(TransportResponse {
                envelope: ResponseEnvelope {
                    status: 200,
                    ..ResponseEnvelope::default()
                },
                rate_limits: reply.rate_limits,
                chunks: reply.into_stream(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::normalize::{normalize, NormalizeOptions};
    use crate::request::CallRequest;
    use futures::StreamExt;

    async fn request(label: &str) -> NormalizedRequest {
        let req = CallRequest::new("gpt-4o-mini")
            .with_message(Message::user("hi"))
            .with_label(label);
        normalize(&req, &NormalizeOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_steps_play_in_order() {
        let transport = ScriptedTransport::new();
        transport.push(Error::Network("reset".into()));
        transport.push(Reply::deltas(["a", "b"]).with_usage(5, 2));

        let req = request("one").await;
        let payload = transport.payload(&req).unwrap();
        assert!(transport.open(&req, &payload).await.is_err());

        let response = transport.open(&req, &payload).await.unwrap();
        let chunks: Vec<RawChunk> = response.chunks.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text_delta, "b");
        assert_eq!(chunks[1].usage.unwrap().completion_tokens, Some(2));
        assert_eq!(chunks[1].finish_reason.as_deref(), Some("stop"));

        let response = transport.open(&req, &payload).await.unwrap();
        let chunks: Vec<RawChunk> = response.chunks.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks[0].text_delta, "mock response");
        assert_eq!(transport.opened(), vec!["one", "one", "one"]);
    }

    #[tokio::test]
    async fn test_gate_holds_final_chunk() {
        let (tx, rx) = oneshot::channel();
        let transport = ScriptedTransport::new();
        transport.push(Reply::deltas(["x", "y"]).gated(rx));

        let req = request("gated").await;
        let mut chunks = transport
            .open(&req, &Value::Null)
            .await
            .unwrap()
            .chunks;
        assert_eq!(chunks.next().await.unwrap().unwrap().text_delta, "x");

        let pending = tokio::time::timeout(Duration::from_millis(20), chunks.next()).await;
        assert!(pending.is_err());

        tx.send(()).unwrap();
        assert_eq!(chunks.next().await.unwrap().unwrap().text_delta, "y");
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_failure_and_fallback() {
        let transport = ScriptedTransport::new().with_fallback(|req| {
            Reply::text(format!("echo {}", req.label().unwrap_or_default())).into()
        });
        transport.push(Reply::deltas(["par", "tial"]).then_fail(Error::Stream("cut".into())));

        let req = request("f").await;
        let items: Vec<Result<RawChunk>> = transport
            .open(&req, &Value::Null)
            .await
            .unwrap()
            .chunks
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], Err(Error::Stream(_))));

        let chunks: Vec<RawChunk> = transport
            .open(&req, &Value::Null)
            .await
            .unwrap()
            .chunks
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks[0].text_delta, "echo f");
    }
}
