//! LLM integration for the reasoning oracle
//!
//! Features:
//! - Ollama and OpenAI-compatible backends with JSON-constrained output
//! - Prompt assembly from a conversation context
//! - `OracleClient`: timeout, single retry and cancellation around a backend

pub mod backend;
pub mod client;
pub mod factory;
pub mod prompt;

pub use backend::{FinishReason, GenerationResult, LlmBackend, LlmConfig, OllamaBackend, OpenAIBackend};
pub use client::{OracleClient, OracleClientConfig};
pub use factory::{create_backend, create_oracle, create_oracle_with_backend};
pub use prompt::{Message, PromptBuilder, Role};

use std::time::Duration;

use thiserror::Error;
use triage_core::OracleError;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for OracleError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Network(msg) => OracleError::Unavailable(msg),
            // Transport-level timeout; the client's own budget reports the real duration
            LlmError::Timeout => OracleError::Timeout(Duration::ZERO),
            LlmError::InvalidResponse(msg) => OracleError::Malformed(msg),
            LlmError::Api(msg) | LlmError::ModelNotFound(msg) | LlmError::Configuration(msg) => {
                OracleError::Rejected(msg)
            }
        }
    }
}
