//! Message types for chat-style calls
//!
//! A message carries either plain text or an ordered list of typed parts.
//! Media parts reference their payload by URL: `data:` URLs, `file://` URLs,
//! bare filesystem paths, or remote `http(s)://` URLs.

use serde::{Deserialize, Serialize};

/// Role in a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message (instructions)
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
}

impl MessageRole {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Detail level requested for an image part
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    /// Fixed low-resolution cost
    Low,
    /// Tiled high-resolution cost
    #[default]
    High,
}

/// Reference to a media payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    /// `data:`, `file://`, `http(s)://` URL or a bare path
    pub url: String,
    /// Declared or resolved MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Filename or caller label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Declared playback length for audio/video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Image detail level
    #[serde(default)]
    pub detail: ImageDetail,
    /// Token-equivalent cost, set during normalization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cost: Option<u64>,
}

impl MediaRef {
    /// Create a reference to the given URL or path
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime: None,
            name: None,
            duration_secs: None,
            detail: ImageDetail::default(),
            token_cost: None,
        }
    }

    /// Set the declared MIME type
    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Set the filename or label
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the declared duration
    #[must_use]
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Set the image detail level
    #[must_use]
    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }

    /// Whether the reference points at anything
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.url.trim().is_empty()
    }
}

/// One typed part of a structured message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    /// Text fragment
    Text {
        /// The text
        text: String,
    },
    /// Image reference
    Image(MediaRef),
    /// Audio reference
    Audio(MediaRef),
    /// Video reference
    Video(MediaRef),
    /// Generic file reference
    File(MediaRef),
}

impl ContentPart {
    /// Create a text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Media reference carried by this part, if any
    #[must_use]
    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            Self::Text { .. } => None,
            Self::Image(m) | Self::Audio(m) | Self::Video(m) | Self::File(m) => Some(m),
        }
    }

    /// Whether the part carries no text and no media
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text { text } => text.trim().is_empty(),
            _ => self.media().is_none_or(MediaRef::is_empty),
        }
    }
}

/// Message content: plain text or structured parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text
    Text(String),
    /// Ordered parts
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Whether nothing in the content would reach the model
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Parts(parts) => parts.iter().all(ContentPart::is_empty),
        }
    }

    /// Concatenated text of all text parts
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Convert into a part list
    #[must_use]
    pub fn into_parts(self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) => vec![ContentPart::Text { text }],
            Self::Parts(parts) => parts,
        }
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,
    /// Message content
    pub content: MessageContent,
}

impl Message {
    /// Create a message with arbitrary content
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Concatenated text content
    #[must_use]
    pub fn text(&self) -> String {
        self.content.text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let system = Message::system("You are a helpful assistant");
        assert_eq!(system.role, MessageRole::System);

        let user = Message::user(vec![
            ContentPart::text("look at this"),
            ContentPart::Image(MediaRef::new("https://example.com/cat.png")),
        ]);
        assert_eq!(user.role, MessageRole::User);
        assert_eq!(user.text(), "look at this");
    }

    #[test]
    fn test_empty_content() {
        assert!(MessageContent::from("   ").is_empty());
        assert!(MessageContent::Parts(vec![]).is_empty());
        assert!(MessageContent::Parts(vec![
            ContentPart::text(""),
            ContentPart::Audio(MediaRef::new(""))
        ])
        .is_empty());
        assert!(!MessageContent::Parts(vec![ContentPart::Image(MediaRef::new(
            "data:image/png;base64,AAAA"
        ))])
        .is_empty());
    }

    #[test]
    fn test_content_serde_shapes() {
        let json = r#"{"role":"user","content":[{"type":"text","text":"hi"},{"type":"image","url":"https://x/y.png","detail":"low"}]}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        match &msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                match &parts[1] {
                    ContentPart::Image(m) => assert_eq!(m.detail, ImageDetail::Low),
                    other => panic!("unexpected part {other:?}"),
                }
            }
            MessageContent::Text(_) => panic!("expected parts"),
        }

        let plain: Message = serde_json::from_str(r#"{"role":"assistant","content":"ok"}"#).unwrap();
        assert_eq!(plain.content, MessageContent::Text("ok".into()));
    }

    #[test]
    fn test_message_role_as_str() {
        assert_eq!(MessageRole::System.as_str(), "system");
        assert_eq!(MessageRole::User.as_str(), "user");
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
    }
}
