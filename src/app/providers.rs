//! Transport resolution
//!
//! Registers a transport for every vendor family with an API key available.
//! A key that is present but malformed fails startup.

use super::config::{ProviderSettings, ProvidersConfig};
use anyhow::{bail, Context, Result};
use runbit_llm::{
    AnthropicConfig, AnthropicTransport, GeminiConfig, GeminiTransport, OpenAiConfig,
    OpenAiTransport, ProviderKind, Transports,
};
use runbit_llm::util::validate_api_key;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build the transport set from configuration and the environment
pub fn resolve_transports(config: &ProvidersConfig) -> Result<Transports> {
    let mut transports = Transports::new();

    if let Some(key) = checked_key(ProviderKind::OpenAi, &config.openai)? {
        let mut openai = OpenAiConfig::new(key);
        if let Some(url) = &config.openai.base_url {
            openai = openai.with_base_url(url);
        }
        if let Some(timeout) = config.openai.timeout() {
            openai = openai.with_timeout(timeout);
        }
        let transport = OpenAiTransport::new(openai).context("Failed to create OpenAI transport")?;
        transports = transports.with(ProviderKind::OpenAi, Arc::new(transport));
        info!("Registered OpenAI transport");
    } else {
        not_available(ProviderKind::OpenAi, &config.openai);
    }

    if let Some(key) = checked_key(ProviderKind::Anthropic, &config.anthropic)? {
        let mut anthropic = AnthropicConfig::new(key);
        if let Some(url) = &config.anthropic.base_url {
            anthropic = anthropic.with_base_url(url);
        }
        if let Some(timeout) = config.anthropic.timeout() {
            anthropic = anthropic.with_timeout(timeout);
        }
        if let Some(max_tokens) = config.anthropic.max_tokens {
            anthropic = anthropic.with_max_tokens(max_tokens);
        }
        let transport =
            AnthropicTransport::new(anthropic).context("Failed to create Anthropic transport")?;
        transports = transports.with(ProviderKind::Anthropic, Arc::new(transport));
        info!("Registered Anthropic transport");
    } else {
        not_available(ProviderKind::Anthropic, &config.anthropic);
    }

    if let Some(key) = checked_key(ProviderKind::Gemini, &config.gemini)? {
        let mut gemini = GeminiConfig::new(key);
        if let Some(url) = &config.gemini.base_url {
            gemini = gemini.with_base_url(url);
        }
        if let Some(timeout) = config.gemini.timeout() {
            gemini = gemini.with_timeout(timeout);
        }
        let transport = GeminiTransport::new(gemini).context("Failed to create Gemini transport")?;
        transports = transports.with(ProviderKind::Gemini, Arc::new(transport));
        info!("Registered Gemini transport");
    } else {
        not_available(ProviderKind::Gemini, &config.gemini);
    }

    if transports.providers().is_empty() {
        warn!("No transport registered; set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY");
    }
    Ok(transports)
}

/// API key for `provider`, rejected when it is too short to be real
fn checked_key(provider: ProviderKind, settings: &ProviderSettings) -> Result<Option<String>> {
    settings
        .api_key()
        .map(|key| validate_key(provider, settings, key))
        .transpose()
}

fn validate_key(provider: ProviderKind, settings: &ProviderSettings, key: String) -> Result<String> {
    if let Some(message) = validate_api_key(key.trim(), display_name(provider)) {
        bail!("{message}; check {}", settings.api_key_env.join(" or "));
    }
    Ok(key)
}

fn display_name(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::OpenAi => "OpenAI",
        ProviderKind::Anthropic => "Anthropic",
        ProviderKind::Gemini => "Gemini",
    }
}

fn not_available(provider: ProviderKind, settings: &ProviderSettings) {
    debug!(
        provider = %provider,
        env = ?settings.api_key_env,
        "Transport not available: no API key"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(var: &str) -> ProviderSettings {
        ProviderSettings {
            api_key_env: vec![var.to_string()],
            base_url: None,
            timeout_secs: None,
            max_tokens: None,
        }
    }

    #[test]
    fn test_short_key_is_rejected() {
        let err = validate_key(ProviderKind::OpenAi, &settings("OPENAI_API_KEY"), "sk-1".into())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("OpenAI API key appears to be invalid"));
        assert!(message.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_valid_key_passes_through() {
        let key = validate_key(
            ProviderKind::Anthropic,
            &settings("ANTHROPIC_API_KEY"),
            "sk-ant-0123456789abcdef".into(),
        )
        .unwrap();
        assert_eq!(key, "sk-ant-0123456789abcdef");
    }

    #[test]
    fn test_unset_key_is_not_an_error() {
        let key = checked_key(ProviderKind::Gemini, &settings("RUNBIT_TEST_UNSET_GEMINI_KEY")).unwrap();
        assert!(key.is_none());
    }
}
