//! Reasoning oracle capability

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::conversation::ConversationContext;

/// Which reasoning step a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStage {
    /// Assess symptoms or ask a clarifying question
    Triage,
    /// Turn a finalized assessment into a care pathway
    Pathway,
}

impl ReasoningStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningStage::Triage => "triage",
            ReasoningStage::Pathway => "pathway",
        }
    }
}

impl std::fmt::Display for ReasoningStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One request to the oracle
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub stage: ReasoningStage,
    /// Instruction text for the stage
    pub instruction: &'a str,
    pub context: &'a ConversationContext,
    /// Stage-specific subject, e.g. the serialized assessment for the pathway stage
    pub subject: Option<&'a str>,
    /// Top-level fields the structured response must contain
    pub expected_fields: &'a [&'a str],
}

/// Oracle failures. Every variant is recovered by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("Oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Oracle rejected request: {0}")]
    Rejected(String),

    #[error("Oracle returned unusable output: {0}")]
    Malformed(String),

    #[error("Oracle call cancelled")]
    Cancelled,
}

impl OracleError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Timeout(_) | OracleError::Unavailable(_))
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::Timeout(_) => "timeout",
            OracleError::Unavailable(_) => "unavailable",
            OracleError::Rejected(_) => "rejected",
            OracleError::Malformed(_) => "malformed",
            OracleError::Cancelled => "cancelled",
        }
    }
}

/// External reasoning capability used for triage and pathway selection.
///
/// Returns raw text expected to contain a structured object; callers validate
/// it before use. Implementations must stop promptly when `cancel` fires and
/// return [`OracleError::Cancelled`].
///
/// # Example
///
/// ```ignore
/// let raw = oracle.invoke(&request, &cancel).await?;
/// let result = validator.validate_triage(&raw)?;
/// ```
#[async_trait]
pub trait ReasoningOracle: Send + Sync + 'static {
    async fn invoke(
        &self,
        request: &OracleRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, OracleError>;

    /// Model or backend name for logging
    fn name(&self) -> &str;
}
