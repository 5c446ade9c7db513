//! Application wiring
//!
//! Split into submodules:
//! - `config`: configuration types
//! - `loader`: layered configuration loading
//! - `providers`: transport registration from API keys

pub mod config;
pub mod loader;
pub mod providers;

pub use config::{AppConfig, LoggingConfig};
pub use loader::load_config;
pub use providers::resolve_transports;
