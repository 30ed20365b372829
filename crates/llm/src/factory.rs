//! Backend factory
//!
//! Builds the configured backend and wraps it in an [`OracleClient`].
//!
//! ## Example
//! ```ignore
//! let settings = load_settings(None)?;
//! let oracle = create_oracle(&settings.oracle)?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use triage_config::{OracleProvider, OracleSettings};

use crate::backend::{LlmBackend, LlmConfig, OllamaBackend, OpenAIBackend};
use crate::client::{OracleClient, OracleClientConfig};
use crate::LlmError;

impl From<&OracleSettings> for LlmConfig {
    fn from(settings: &OracleSettings) -> Self {
        Self {
            model: settings.model.clone(),
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            // Outer guard only; the client enforces cold/warm budgets
            request_timeout: settings.cold_timeout() + Duration::from_secs(5),
            json_mode: true,
            ..Default::default()
        }
    }
}

/// Create the backend selected by `oracle.provider`
pub fn create_backend(settings: &OracleSettings) -> Result<Arc<dyn LlmBackend>, LlmError> {
    let config = LlmConfig::from(settings);
    let backend: Arc<dyn LlmBackend> = match settings.provider {
        OracleProvider::Ollama => Arc::new(OllamaBackend::new(config)?),
        OracleProvider::OpenAi => Arc::new(OpenAIBackend::new(config)?),
    };

    tracing::info!(
        provider = ?settings.provider,
        endpoint = %settings.endpoint,
        model = %settings.model,
        "Created LLM backend"
    );

    Ok(backend)
}

/// Create an oracle client around an existing backend
pub fn create_oracle_with_backend(
    backend: Arc<dyn LlmBackend>,
    settings: &OracleSettings,
) -> OracleClient {
    OracleClient::new(backend, OracleClientConfig::from(settings))
}

/// Create the backend and the oracle client in one step
pub fn create_oracle(settings: &OracleSettings) -> Result<OracleClient, LlmError> {
    let backend = create_backend(settings)?;
    Ok(create_oracle_with_backend(backend, settings))
}
