//! Message normalization
//!
//! Rewrites a [`CallRequest`] into a provider-safe [`NormalizedRequest`]:
//!
//! 1. JSON mode: inject the `json` marker, or drop the flag for models that
//!    cannot honor it
//! 2. Coerce numeric parameters
//! 3. Resolve media parts (multi-modal models only)
//! 4. Drop empty parts and messages
//! 5. Merge consecutive messages sharing a role
//!
//! Normalizing an already normalized request yields the same request.

pub mod media;
pub mod text;


use crate::error::{Error, Result};
use crate::message::{ContentPart, Message, MessageContent, MessageRole};
use crate::models::{self, ModelProfile};
use crate::request::{CallRequest, GenerationParams, RawParams};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Marker appended when a JSON-mode prompt does not mention JSON
pub const JSON_MARKER: &str = "\n\nRespond in json.";

/// Normalization switches
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NormalizeOptions {
    /// Allow `file://` URLs and bare paths to be read from disk
    #[serde(default)]
    pub allow_local_files: bool,
}

/// A request after normalization
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedRequest {
    profile: ModelProfile,
    messages: Vec<Message>,
    params: GenerationParams,
    label: Option<String>,
}

impl NormalizedRequest {
    /// Model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.profile.model
    }

    /// Model-class key
    #[must_use]
    pub fn key(&self) -> &str {
        &self.profile.key
    }

    /// Resolved model profile
    #[must_use]
    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// Normalized messages
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Coerced parameters
    #[must_use]
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Caller label
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Total token-equivalent cost of media parts
    #[must_use]
    pub fn media_tokens(&self) -> u64 {
        self.messages
            .iter()
            .filter_map(|m| match &m.content {
                MessageContent::Parts(parts) => Some(parts),
                MessageContent::Text(_) => None,
            })
            .flatten()
            .filter_map(|p| p.media().and_then(|m| m.token_cost))
            .sum()
    }

    /// Convert back into a caller request
    #[must_use]
    pub fn to_call_request(&self) -> CallRequest {
        CallRequest {
            model: self.profile.model.clone(),
            messages: self.messages.clone(),
            params: RawParams::from(&self.params),
            label: self.label.clone(),
        }
    }
}

/// Normalize a call request
///
/// # Errors
///
/// - [`Error::InvalidRequest`] for non-numeric parameters or when no
///   message survives
/// - [`Error::PolicyViolation`] for local media while local files are
///   disallowed
/// - [`Error::Media`] for unreadable media
pub async fn normalize(request: &CallRequest, options: &NormalizeOptions) -> Result<NormalizedRequest> {
    let profile = models::resolve(&request.model);
    let mut messages = request.messages.clone();

    let mut params = request.params.coerce()?;
    apply_json_mode(&mut messages, &mut params, &profile);

    if profile.multimodal {
        messages = resolve_media(messages, options).await?;
    }

    let messages = merge_same_role(drop_empty(messages));
    if messages.is_empty() {
        return Err(Error::InvalidRequest(
            "request has no message with content".to_string(),
        ));
    }

    debug!(
        model = %profile.model,
        key = %profile.key,
        messages = messages.len(),
        json_mode = params.json_mode,
        "Normalized request"
    );

    Ok(NormalizedRequest {
        profile,
        messages,
        params,
        label: request.label.clone(),
    })
}

/// Ensure the JSON marker, or clear the flag for models without JSON mode
pub fn apply_json_mode(messages: &mut [Message], params: &mut GenerationParams, profile: &ModelProfile) {
    if !params.json_mode {
        return;
    }
    if !profile.json_mode {
        debug!(model = %profile.model, "JSON mode unsupported, dropping flag");
        params.json_mode = false;
        return;
    }

    let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == MessageRole::User) else {
        return;
    };
    if last_user.text().to_lowercase().contains("json") {
        return;
    }
    match &mut last_user.content {
        MessageContent::Text(text) => text.push_str(JSON_MARKER),
        MessageContent::Parts(parts) => {
            let last_text = parts.iter_mut().rev().find_map(|p| match p {
                ContentPart::Text { text } => Some(text),
                _ => None,
            });
            match last_text {
                Some(text) => text.push_str(JSON_MARKER),
                None => parts.push(ContentPart::text(JSON_MARKER.trim_start())),
            }
        }
    }
}

async fn resolve_media(messages: Vec<Message>, options: &NormalizeOptions) -> Result<Vec<Message>> {
    let mut resolved = Vec::with_capacity(messages.len());
    for message in messages {
        let content = match message.content {
            MessageContent::Parts(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    out.push(media::resolve_part(part, options).await?);
                }
                MessageContent::Parts(out)
            }
            text @ MessageContent::Text(_) => text,
        };
        resolved.push(Message {
            role: message.role,
            content,
        });
    }
    Ok(resolved)
}

/// Drop empty parts, then messages left without content
#[must_use]
pub fn drop_empty(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter_map(|mut message| {
            if let MessageContent::Parts(parts) = &mut message.content {
                parts.retain(|p| !p.is_empty());
            }
            (!message.content.is_empty()).then_some(message)
        })
        .collect()
}

/// Merge consecutive messages that share a role
///
/// Plain text content becomes a part list on the first merge.
#[must_use]
pub fn merge_same_role(messages: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(prev) if prev.role == message.role => {
                let content = std::mem::replace(&mut prev.content, MessageContent::Parts(Vec::new()));
                let mut parts = content.into_parts();
                parts.extend(message.content.into_parts());
                prev.content = MessageContent::Parts(parts);
            }
            _ => merged.push(message),
        }
    }
    merged
}
