//! Triage Server
//!
//! HTTP surface for the triage orchestrator: one endpoint per patient turn,
//! plus health and Prometheus metrics.

pub mod http;
pub mod metrics;
pub mod state;

pub use http::create_router;
pub use metrics::{init_metrics, metrics_handler, record_request};
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            // nginx-style "client closed request"; rarely seen since the client is gone
            ServerError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT),
            ServerError::Configuration(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let status = StatusCode::from(self);
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<triage_agent::AgentError> for ServerError {
    fn from(err: triage_agent::AgentError) -> Self {
        match err {
            triage_agent::AgentError::Cancelled => ServerError::Cancelled,
            triage_agent::AgentError::Configuration(msg) => ServerError::Configuration(msg),
        }
    }
}

impl From<triage_llm::LlmError> for ServerError {
    fn from(err: triage_llm::LlmError) -> Self {
        ServerError::Configuration(err.to_string())
    }
}

impl From<triage_config::ConfigError> for ServerError {
    fn from(err: triage_config::ConfigError) -> Self {
        ServerError::Configuration(err.to_string())
    }
}
