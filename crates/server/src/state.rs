//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use triage_agent::TriageOrchestrator;
use triage_config::Settings;
use triage_llm::LlmBackend;

use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub orchestrator: Arc<TriageOrchestrator>,
    /// Backend behind the oracle, kept for readiness probes
    pub backend: Arc<dyn LlmBackend>,
}

impl AppState {
    /// Build the backend, the oracle client and the orchestrator from settings
    pub fn new(config: Settings) -> Result<Self, ServerError> {
        let backend = triage_llm::create_backend(&config.oracle)?;
        let oracle = Arc::new(triage_llm::create_oracle_with_backend(
            backend.clone(),
            &config.oracle,
        ));
        let orchestrator = TriageOrchestrator::from_settings(&config, oracle)?;

        Ok(Self::with_components(config, backend, Arc::new(orchestrator)))
    }

    /// Assemble state from prebuilt parts
    pub fn with_components(
        config: Settings,
        backend: Arc<dyn LlmBackend>,
        orchestrator: Arc<TriageOrchestrator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            backend,
        }
    }
}
