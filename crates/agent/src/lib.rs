//! Triage orchestration
//!
//! Features:
//! - Emergency lexicon short-circuit ahead of any model call
//! - Bounded conversation context with media summaries
//! - Strict validation of oracle output with safe fallbacks
//! - Confidence gate, care pathway floor and action planning
//! - Explicit state graph with a static transition table

pub mod context;
pub mod lexicon;
pub mod orchestrator;
pub mod planner;
pub mod validator;

pub use context::{count_trailing_follow_ups, summarize_media, ContextWindowBuilder};
pub use lexicon::EmergencyLexicon;
pub use orchestrator::{RunReport, TriageOrchestrator, TriageState};
pub use planner::{apply_pathway_floor, ActionPlanner};
pub use validator::{
    check_pathway_consistency, contains_diagnostic_language, ResponseValidator,
    ValidationFailure, ValidationReason,
};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller cancelled the turn; no outcome was produced
    #[error("Turn cancelled")]
    Cancelled,
}

impl From<triage_config::ConfigError> for AgentError {
    fn from(err: triage_config::ConfigError) -> Self {
        AgentError::Configuration(err.to_string())
    }
}
