//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var("RUNBIT_ENV").unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority), RUNBIT_SCHEDULER__MAX_ATTEMPTS style
        .add_source(
            Environment::with_prefix("RUNBIT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded() -> AppConfig {
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_embedded_defaults() {
        let config = embedded();
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert!(!config.allow_local_files);
        assert!(config.history.enabled);
        assert_eq!(config.scheduler.max_attempts, 5);
        assert_eq!(config.scheduler.default_window_secs, 60);
        assert!(config.scheduler.seed_from_registry);
        assert_eq!(
            config.providers.gemini.api_key_env,
            vec!["GEMINI_API_KEY", "GOOGLE_API_KEY"]
        );
        assert_eq!(config.providers.anthropic.max_tokens, Some(4096));
        assert!(config.rate_limits.is_empty());
        assert!(config.logging.dir.is_none());
    }

    #[test]
    fn test_rate_limit_overrides_reach_scheduler() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(
                "[rate_limits.gpt-4o]\nrequests = 3\ntokens = 900\n",
                FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let scheduler = config.scheduler_config(false);
        assert_eq!(scheduler.limits.get("gpt-4o"), Some(&(3, 900)));
        assert!(scheduler.seed_from_registry);
        assert!(!scheduler.normalize.allow_local_files);
        assert!(config.scheduler_config(true).normalize.allow_local_files);
    }
}
