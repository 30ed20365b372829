//! Core types for conversational triage
//!
//! This crate provides the types shared by every other crate:
//! - Conversation turns, media references and the context snapshot
//! - Triage results, care pathways, action plans and outcomes
//! - The `ReasoningOracle` capability trait and its error type

pub mod conversation;
pub mod traits;
pub mod triage;

pub use conversation::{
    ConversationContext, ConversationTurn, MediaKind, MediaReference, TurnKind, TurnRole,
};
pub use traits::{OracleError, OracleRequest, ReasoningOracle, ReasoningStage};
pub use triage::{
    ActionPlan, Assessment, CarePathway, EscalationReason, FollowUpOrigin, OrchestrationOutcome,
    PathwayCategory, PathwayOrigin, Severity, TriageResult,
};
