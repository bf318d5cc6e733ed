//! Layered configuration for the voice agent runtime.
//!
//! Settings load from (in increasing priority) built-in defaults,
//! `config/<base>.yaml`, `config/<environment>.yaml`, and
//! `VOICE_AGENT__*` environment variables.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AudioConfig, BudgetsConfig, ObservabilityConfig, OrchestratorConfig,
    OutboxConfig, PersistenceConfig, RagConfig, RateLimitConfig, RetrievalConfig,
    RuntimeEnvironment, SecurityConfig, ServerConfig, Settings, WsConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
