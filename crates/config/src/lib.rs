//! Configuration management for the triage assistant
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default`, `config/{env}`)
//! - Environment variables (TRIAGE__ prefix)
//!
//! Settings are validated once at start; an invalid safety policy is a fatal
//! error rather than something to run with.

pub mod constants;
pub mod prompts;
pub mod settings;

pub use settings::{
    load_settings, ObservabilityConfig, OracleProvider, OracleSettings, RuntimeEnvironment,
    ServerConfig, Settings, TriagePolicy,
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

impl ConfigError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
