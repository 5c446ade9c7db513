//! Model registry
//!
//! Maps vendor model identifiers to a model-class key (short code), a vendor
//! family, per-1K-token rates, a tokenizer, capabilities and default
//! rate-limit budgets. Lookups match the longest registered prefix, so
//! dated variants (`gpt-4o-2024-08-06`) share their family's key.

use serde::{Deserialize, Serialize};

/// Vendor wire family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions
    OpenAi,
    /// Anthropic Messages API
    Anthropic,
    /// Google Gemini
    Gemini,
}

impl ProviderKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BPE vocabulary used for local token estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenizerKind {
    /// `o200k_base`
    O200k,
    /// `cl100k_base`, the fallback
    Cl100k,
}

/// Static registry entry
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    /// Identifier prefix this entry matches
    pub prefix: &'static str,
    /// Model-class key shared by all matching variants
    pub short_code: &'static str,
    /// Vendor family
    pub provider: ProviderKind,
    /// USD per 1K prompt tokens
    pub prompt_rate: f64,
    /// USD per 1K completion tokens
    pub completion_rate: f64,
    /// Tokenizer
    pub tokenizer: TokenizerKind,
    /// Whether the model honors JSON mode
    pub json_mode: bool,
    /// Whether media parts are accepted
    pub multimodal: bool,
    /// Output token ceiling
    pub max_output_tokens: u32,
    /// Default requests per window
    pub limit_requests: u64,
    /// Default tokens per window
    pub limit_tokens: u64,
}

macro_rules! model {
    ($prefix:literal, $code:literal, $provider:ident, $prompt:literal, $completion:literal,
     $tok:ident, json: $json:literal, mm: $mm:literal, out: $out:literal, rpm: $rpm:literal, tpm: $tpm:literal) => {
        ModelSpec {
            prefix: $prefix,
            short_code: $code,
            provider: ProviderKind::$provider,
            prompt_rate: $prompt,
            completion_rate: $completion,
            tokenizer: TokenizerKind::$tok,
            json_mode: $json,
            multimodal: $mm,
            max_output_tokens: $out,
            limit_requests: $rpm,
            limit_tokens: $tpm,
        }
    };
}

/// Registered model families
pub static MODELS: &[ModelSpec] = &[
    // OpenAI
    model!("gpt-4o", "gpt-4o", OpenAi, 0.0025, 0.01, O200k, json: true, mm: true, out: 16384, rpm: 500, tpm: 30000),
    model!("gpt-4o-mini", "gpt-4o-mini", OpenAi, 0.00015, 0.0006, O200k, json: true, mm: true, out: 16384, rpm: 500, tpm: 200000),
    model!("gpt-4.1", "gpt-41", OpenAi, 0.002, 0.008, O200k, json: true, mm: true, out: 32768, rpm: 500, tpm: 30000),
    model!("gpt-4.1-mini", "gpt-41-mini", OpenAi, 0.0004, 0.0016, O200k, json: true, mm: true, out: 32768, rpm: 500, tpm: 200000),
    model!("gpt-4.1-nano", "gpt-41-nano", OpenAi, 0.0001, 0.0004, O200k, json: true, mm: true, out: 32768, rpm: 500, tpm: 200000),
    model!("gpt-4-turbo", "gpt-4-128k", OpenAi, 0.01, 0.03, Cl100k, json: true, mm: true, out: 4096, rpm: 500, tpm: 30000),
    model!("gpt-4-1106-preview", "gpt-4-128k", OpenAi, 0.01, 0.03, Cl100k, json: true, mm: false, out: 4096, rpm: 500, tpm: 30000),
    model!("gpt-4-0125-preview", "gpt-4-128k", OpenAi, 0.01, 0.03, Cl100k, json: true, mm: false, out: 4096, rpm: 500, tpm: 30000),
    model!("gpt-4", "gpt-4", OpenAi, 0.03, 0.06, Cl100k, json: false, mm: false, out: 8192, rpm: 500, tpm: 10000),
    model!("gpt-3.5-turbo", "gpt-35", OpenAi, 0.0005, 0.0015, Cl100k, json: true, mm: false, out: 4096, rpm: 3500, tpm: 200000),
    model!("gpt-5", "gpt-5", OpenAi, 0.00125, 0.01, O200k, json: true, mm: true, out: 128000, rpm: 500, tpm: 30000),
    model!("o1", "o1", OpenAi, 0.015, 0.06, O200k, json: true, mm: true, out: 100000, rpm: 500, tpm: 30000),
    model!("o3-mini", "o3-mini", OpenAi, 0.0011, 0.0044, O200k, json: true, mm: false, out: 100000, rpm: 500, tpm: 200000),
    // Anthropic
    model!("claude-3-5-sonnet", "claude-35-sonnet", Anthropic, 0.003, 0.015, Cl100k, json: false, mm: true, out: 8192, rpm: 50, tpm: 40000),
    model!("claude-3-5-haiku", "claude-35-haiku", Anthropic, 0.0008, 0.004, Cl100k, json: false, mm: true, out: 8192, rpm: 50, tpm: 50000),
    model!("claude-3-opus", "claude-3-opus", Anthropic, 0.015, 0.075, Cl100k, json: false, mm: true, out: 4096, rpm: 50, tpm: 20000),
    model!("claude-sonnet-4", "claude-sonnet-4", Anthropic, 0.003, 0.015, Cl100k, json: false, mm: true, out: 64000, rpm: 50, tpm: 30000),
    model!("claude-opus-4", "claude-opus-4", Anthropic, 0.015, 0.075, Cl100k, json: false, mm: true, out: 32000, rpm: 50, tpm: 30000),
    // Gemini
    model!("gemini-1.5-pro", "gemini-15-pro", Gemini, 0.00125, 0.005, Cl100k, json: true, mm: true, out: 8192, rpm: 360, tpm: 4000000),
    model!("gemini-1.5-flash", "gemini-15-flash", Gemini, 0.000075, 0.0003, Cl100k, json: true, mm: true, out: 8192, rpm: 1000, tpm: 4000000),
    model!("gemini-2.0-flash", "gemini-20-flash", Gemini, 0.0001, 0.0004, Cl100k, json: true, mm: true, out: 8192, rpm: 2000, tpm: 4000000),
    model!("gemini-2.5-pro", "gemini-25-pro", Gemini, 0.00125, 0.01, Cl100k, json: true, mm: true, out: 65536, rpm: 150, tpm: 2000000),
];

/// Longest-prefix registry match
#[must_use]
pub fn lookup(model: &str) -> Option<&'static ModelSpec> {
    MODELS
        .iter()
        .filter(|spec| model.starts_with(spec.prefix))
        .max_by_key(|spec| spec.prefix.len())
}

/// Per-1K rates for a short code
#[must_use]
pub fn rates(short_code: &str) -> Option<(f64, f64)> {
    MODELS
        .iter()
        .find(|spec| spec.short_code == short_code)
        .map(|spec| (spec.prompt_rate, spec.completion_rate))
}

/// Resolved view of a model identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// The identifier as requested
    pub model: String,
    /// Model-class key
    pub key: String,
    /// Vendor family
    pub provider: ProviderKind,
    /// Tokenizer
    pub tokenizer: TokenizerKind,
    /// JSON-mode capability
    pub json_mode: bool,
    /// Media capability
    pub multimodal: bool,
    /// Output token ceiling, if known
    pub max_output_tokens: Option<u32>,
    /// Default `(requests, tokens)` per window, if known
    pub default_limits: Option<(u64, u64)>,
    /// Whether the model was found in the registry
    pub known: bool,
}

/// Resolve a model identifier
///
/// Unknown models use the identifier itself as their key, a provider guessed
/// from the name, no capabilities and no default limits.
#[must_use]
pub fn resolve(model: &str) -> ModelProfile {
    match lookup(model) {
        Some(spec) => ModelProfile {
            model: model.to_string(),
            key: spec.short_code.to_string(),
            provider: spec.provider,
            tokenizer: spec.tokenizer,
            json_mode: spec.json_mode,
            multimodal: spec.multimodal,
            max_output_tokens: Some(spec.max_output_tokens),
            default_limits: Some((spec.limit_requests, spec.limit_tokens)),
            known: true,
        },
        None => ModelProfile {
            model: model.to_string(),
            key: model.to_string(),
            provider: guess_provider(model),
            tokenizer: guess_tokenizer(model),
            json_mode: false,
            multimodal: false,
            max_output_tokens: None,
            default_limits: None,
            known: false,
        },
    }
}

fn guess_provider(model: &str) -> ProviderKind {
    if model.starts_with("claude") {
        ProviderKind::Anthropic
    } else if model.starts_with("gemini") {
        ProviderKind::Gemini
    } else {
        ProviderKind::OpenAi
    }
}

fn guess_tokenizer(model: &str) -> TokenizerKind {
    const O200K_FAMILIES: &[&str] = &["gpt-4o", "gpt-4.1", "gpt-5", "o1", "o3", "o4"];
    if O200K_FAMILIES.iter().any(|p| model.starts_with(p)) {
        TokenizerKind::O200k
    } else {
        TokenizerKind::Cl100k
    }
}
