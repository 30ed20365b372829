//! Capability traits the orchestrator depends on

mod oracle;

pub use oracle::{OracleError, OracleRequest, ReasoningOracle, ReasoningStage};
