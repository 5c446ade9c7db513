//! Caller-facing call request
//!
//! Generation parameters arrive loosely typed (numbers or numeric strings)
//! and are coerced into [`GenerationParams`] during normalization.

use crate::error::{Error, Result};
use crate::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat request as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    /// Target model identifier
    pub model: String,
    /// Ordered messages
    pub messages: Vec<Message>,
    /// Generation parameters
    #[serde(default)]
    pub params: RawParams,
    /// Caller label used in history keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CallRequest {
    /// Create an empty request for a model
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            params: RawParams::default(),
            label: None,
        }
    }

    /// Append a message
    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Replace the message list
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the caller label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Request JSON output
    #[must_use]
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.params.json_mode = enabled;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.params.temperature = Some(Value::from(temperature));
        self
    }

    /// Set the output token ceiling
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = Some(Value::from(max_tokens));
        self
    }
}

/// Generation parameters as received, before coercion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawParams {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Value>,
    /// Nucleus sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<Value>,
    /// Number of choices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<Value>,
    /// Output token ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<Value>,
    /// Streaming flag
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// JSON-mode flag
    #[serde(default)]
    pub json_mode: bool,
}

fn default_stream() -> bool {
    true
}

impl Default for RawParams {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            n: None,
            max_tokens: None,
            stream: default_stream(),
            json_mode: false,
        }
    }
}

impl RawParams {
    /// Coerce numbers and numeric strings into typed parameters
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for non-numeric values.
    pub fn coerce(&self) -> Result<GenerationParams> {
        Ok(GenerationParams {
            temperature: coerce_float("temperature", self.temperature.as_ref())?,
            top_p: coerce_float("top_p", self.top_p.as_ref())?,
            n: coerce_int("n", self.n.as_ref())?,
            max_tokens: coerce_int("max_tokens", self.max_tokens.as_ref())?,
            stream: self.stream,
            json_mode: self.json_mode,
        })
    }
}

/// Typed generation parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Nucleus sampling
    pub top_p: Option<f64>,
    /// Number of choices
    pub n: Option<u32>,
    /// Output token ceiling
    pub max_tokens: Option<u32>,
    /// Streaming flag
    pub stream: bool,
    /// JSON-mode flag, cleared when the model cannot honor it
    pub json_mode: bool,
}

impl From<&GenerationParams> for RawParams {
    fn from(p: &GenerationParams) -> Self {
        Self {
            temperature: p.temperature.map(Value::from),
            top_p: p.top_p.map(Value::from),
            n: p.n.map(Value::from),
            max_tokens: p.max_tokens.map(Value::from),
            stream: p.stream,
            json_mode: p.json_mode,
        }
    }
}

fn coerce_float(name: &str, value: Option<&Value>) -> Result<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid_number(name, value)),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid_number(name, value)),
        Some(_) => Err(invalid_number(name, value)),
    }
}

fn coerce_int(name: &str, value: Option<&Value>) -> Result<Option<u32>> {
    let Some(float) = coerce_float(name, value)? else {
        return Ok(None);
    };
    if float < 0.0 || float.fract() != 0.0 || float > f64::from(u32::MAX) {
        return Err(invalid_number(name, value));
    }
    Ok(Some(float as u32))
}

fn invalid_number(name: &str, value: Option<&Value>) -> Error {
    let shown = value.map_or_else(|| "null".to_string(), Value::to_string);
    Error::InvalidRequest(format!("parameter '{name}' is not numeric: {shown}"))
}
