//! Application configuration types

use runbit_core::{RetryPolicy, SchedulerConfig};
use runbit_llm::{HistoryStore, NormalizeOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub allow_local_files: bool,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Per-key `(requests, tokens)` overrides
    #[serde(default)]
    pub rate_limits: HashMap<String, LimitOverride>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            allow_local_files: false,
            history: HistoryConfig::default(),
            scheduler: SchedulerSettings::default(),
            providers: ProvidersConfig::default(),
            rate_limits: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// History store for attempt artifacts
    pub fn history_store(&self) -> HistoryStore {
        if !self.history.enabled {
            return HistoryStore::disabled();
        }
        match &self.history.dir {
            Some(dir) => HistoryStore::with_path(dir),
            None => HistoryStore::new(),
        }
    }

    /// Scheduler configuration; the CLI flag can only widen `allow_local_files`
    pub fn scheduler_config(&self, allow_local_files: bool) -> SchedulerConfig {
        let retry = RetryPolicy::new()
            .with_max_attempts(self.scheduler.max_attempts)
            .with_default_wait(Duration::from_secs(self.scheduler.default_window_secs));

        let mut config = SchedulerConfig::new()
            .with_retry(retry)
            .with_default_window(Duration::from_secs(self.scheduler.default_window_secs))
            .with_normalize(NormalizeOptions {
                allow_local_files: self.allow_local_files || allow_local_files,
            })
            .with_registry_limits(self.scheduler.seed_from_registry);

        for (key, limit) in &self.rate_limits {
            config = config.with_limits(key.clone(), limit.requests, limit.tokens);
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_true")]
    pub seed_from_registry: bool,
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_window_secs: default_window_secs(),
            max_attempts: default_max_attempts(),
            seed_from_registry: true,
        }
    }
}

/// Vendor transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "ProviderSettings::openai")]
    pub openai: ProviderSettings,
    #[serde(default = "ProviderSettings::anthropic")]
    pub anthropic: ProviderSettings,
    #[serde(default = "ProviderSettings::gemini")]
    pub gemini: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderSettings::openai(),
            anthropic: ProviderSettings::anthropic(),
            gemini: ProviderSettings::gemini(),
        }
    }
}

/// One vendor transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Environment variables holding the API key, first non-empty wins
    #[serde(default)]
    pub api_key_env: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Anthropic only: `max_tokens` when the caller sets none
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ProviderSettings {
    fn with_env(vars: &[&str]) -> Self {
        Self {
            api_key_env: vars.iter().map(|v| (*v).to_string()).collect(),
            base_url: None,
            timeout_secs: None,
            max_tokens: None,
        }
    }

    fn openai() -> Self {
        Self::with_env(&["OPENAI_API_KEY"])
    }

    fn anthropic() -> Self {
        Self::with_env(&["ANTHROPIC_API_KEY"])
    }

    fn gemini() -> Self {
        Self::with_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"])
    }

    /// API key from the first configured variable that is set
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|key| !key.trim().is_empty())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitOverride {
    pub requests: u64,
    pub tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory of the daily rolling log file
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Write the log file as JSON lines
    #[serde(default)]
    pub json: bool,
}

fn default_file_prefix() -> String {
    "runbit.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            file_prefix: default_file_prefix(),
            json: false,
        }
    }
}
