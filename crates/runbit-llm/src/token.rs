//! Token counting
//!
//! Local estimates use tiktoken's `o200k_base` vocabulary for the GPT-4o
//! generation and later, and `cl100k_base` for every other model. The
//! fallback is approximate for non-OpenAI vendors; their in-band usage
//! replaces it once observed.

use crate::message::{Message, MessageContent};
use crate::models::TokenizerKind;
use std::sync::LazyLock;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

static CL100K: LazyLock<CoreBPE> = LazyLock::new(|| {
    cl100k_base().expect("cl100k_base tokenizer is a compile-time constant and should never fail")
});

static O200K: LazyLock<CoreBPE> = LazyLock::new(|| {
    o200k_base().expect("o200k_base tokenizer is a compile-time constant and should never fail")
});

/// Role marker and separators per message
pub const MESSAGE_OVERHEAD: u64 = 6;

/// Start/end tokens per conversation
pub const CONVERSATION_OVERHEAD: u64 = 3;

/// Tokenizer bound to one vocabulary
#[derive(Debug, Clone, Copy)]
pub struct TokenCounter {
    kind: TokenizerKind,
}

impl TokenCounter {
    /// Create a counter for the given vocabulary
    #[must_use]
    pub const fn new(kind: TokenizerKind) -> Self {
        Self { kind }
    }

    fn bpe(&self) -> &'static CoreBPE {
        match self.kind {
            TokenizerKind::O200k => &O200K,
            TokenizerKind::Cl100k => &CL100K,
        }
    }

    /// Count tokens in a string
    #[must_use]
    pub fn count_tokens(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        self.bpe().encode_with_special_tokens(text).len() as u64
    }

    /// Count text tokens in a message, with role overhead
    #[must_use]
    pub fn count_message_tokens(&self, message: &Message) -> u64 {
        let text = match &message.content {
            MessageContent::Text(text) => self.count_tokens(text),
            MessageContent::Parts(_) => self.count_tokens(&message.text()),
        };
        text + MESSAGE_OVERHEAD
    }

    /// Count text tokens in a conversation
    #[must_use]
    pub fn count_conversation_tokens(&self, messages: &[Message]) -> u64 {
        messages
            .iter()
            .map(|m| self.count_message_tokens(m))
            .sum::<u64>()
            + CONVERSATION_OVERHEAD
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new(TokenizerKind::Cl100k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_counter_basic() {
        let counter = TokenCounter::default();

        let tokens = counter.count_tokens("Hello, world!");
        assert!(tokens > 0);
        assert!(tokens < 10);

        assert_eq!(counter.count_tokens(""), 0);
    }

    #[test]
    fn test_both_vocabularies_count() {
        let text = "Die Straßenbahn fährt um 9 Uhr ab. 東京は晴れです。";
        let cl = TokenCounter::new(TokenizerKind::Cl100k).count_tokens(text);
        let o2 = TokenCounter::new(TokenizerKind::O200k).count_tokens(text);
        assert!(cl > 0 && o2 > 0);
    }

    #[test]
    fn test_token_counter_conversation() {
        let counter = TokenCounter::default();

        let messages = vec![
            Message::system("You are a helpful assistant."),
            Message::user("Hello!"),
            Message::assistant("Hi there! How can I help you?"),
        ];

        let total = counter.count_conversation_tokens(&messages);
        let sum: u64 = messages
            .iter()
            .map(|m| counter.count_message_tokens(m))
            .sum();
        assert_eq!(total, sum + CONVERSATION_OVERHEAD);
        assert_eq!(
            counter.count_message_tokens(&messages[1]),
            counter.count_tokens("Hello!") + MESSAGE_OVERHEAD
        );
    }
}
