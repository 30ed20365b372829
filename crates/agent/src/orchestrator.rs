//! Triage orchestrator
//!
//! Runs one patient turn through the triage graph:
//!
//! ```text
//! START → PERCEIVE → EMERGENCY_CHECK → {ESCALATE | TRIAGE_REASON}
//!       → {ASK_FOLLOW_UP | CONFIDENCE_GATE} → {ESCALATE | PATHWAY_SELECT}
//!       → ACTION_PLAN → FINALIZE
//! ```
//!
//! Stateless between turns. Everything a run needs arrives as arguments and
//! the caller owns history, including the follow-up questions that feed the
//! consecutive follow-up cap.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use triage_config::constants::messages;
use triage_config::{prompts, Settings, TriagePolicy};
use triage_core::{
    Assessment, CarePathway, ConversationContext, ConversationTurn, EscalationReason,
    FollowUpOrigin, MediaReference, OracleError, OracleRequest, OrchestrationOutcome,
    ReasoningOracle, ReasoningStage, Severity, TriageResult,
};

use crate::context::{count_trailing_follow_ups, ContextWindowBuilder};
use crate::lexicon::EmergencyLexicon;
use crate::planner::{apply_pathway_floor, ActionPlanner};
use crate::validator::{
    check_pathway_consistency, ResponseValidator, ValidationFailure, ValidationReason,
};
use crate::AgentError;

/// Nodes of the triage graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriageState {
    Start,
    Perceive,
    EmergencyCheck,
    TriageReason,
    ConfidenceGate,
    PathwaySelect,
    ActionPlan,
    /// Terminal: waiting for the patient's next turn
    AskFollowUp,
    /// Terminal
    Escalate,
    /// Terminal
    Finalize,
}

static TRANSITIONS: Lazy<HashMap<TriageState, &'static [TriageState]>> = Lazy::new(|| {
    use TriageState::*;
    let mut map = HashMap::new();
    map.insert(Start, &[Perceive] as &[_]);
    map.insert(Perceive, &[EmergencyCheck] as &[_]);
    // AskFollowUp/Escalate here cover empty input and the follow-up cap
    map.insert(EmergencyCheck, &[Escalate, TriageReason, AskFollowUp] as &[_]);
    map.insert(TriageReason, &[AskFollowUp, ConfidenceGate, Escalate] as &[_]);
    map.insert(ConfidenceGate, &[Escalate, PathwaySelect] as &[_]);
    map.insert(PathwaySelect, &[ActionPlan] as &[_]);
    map.insert(ActionPlan, &[Finalize] as &[_]);
    map.insert(AskFollowUp, &[] as &[_]);
    map.insert(Escalate, &[] as &[_]);
    map.insert(Finalize, &[] as &[_]);
    map
});

impl TriageState {
    pub fn allowed_transitions(&self) -> &'static [TriageState] {
        TRANSITIONS.get(self).copied().unwrap_or(&[])
    }

    pub fn can_transition_to(&self, target: TriageState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

/// What happened during one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub outcome: OrchestrationOutcome,
    /// States visited, starting at `Start`
    pub path: Vec<TriageState>,
    /// Logical oracle invocations (retries inside the client not counted)
    pub oracle_calls: usize,
}

/// Path bookkeeping for one run
struct Run {
    path: Vec<TriageState>,
    oracle_calls: usize,
}

impl Run {
    fn new() -> Self {
        Self {
            path: vec![TriageState::Start],
            oracle_calls: 0,
        }
    }

    fn enter(&mut self, next: TriageState) {
        if let Some(current) = self.path.last() {
            debug_assert!(
                current.can_transition_to(next),
                "illegal transition {:?} -> {:?}",
                current,
                next
            );
            tracing::trace!(from = ?current, to = ?next, "triage transition");
        }
        self.path.push(next);
    }

    fn finish(self, outcome: OrchestrationOutcome) -> RunReport {
        metrics::counter!("triage_outcomes_total", "outcome" => outcome.kind()).increment(1);
        if let Some(reason) = outcome.escalation_reason() {
            metrics::counter!("triage_escalations_total", "reason" => reason.as_str()).increment(1);
        }
        tracing::info!(
            outcome = outcome.kind(),
            reason = outcome.escalation_reason().map(|r| r.as_str()),
            oracle_calls = self.oracle_calls,
            "Triage turn complete"
        );
        RunReport {
            outcome,
            path: self.path,
            oracle_calls: self.oracle_calls,
        }
    }
}

/// The triage orchestrator. Immutable after construction and safe to share
/// across concurrent runs.
pub struct TriageOrchestrator {
    oracle: Arc<dyn ReasoningOracle>,
    lexicon: EmergencyLexicon,
    context_builder: ContextWindowBuilder,
    validator: ResponseValidator,
    planner: ActionPlanner,
    confidence_threshold: f32,
    max_consecutive_follow_ups: usize,
    triage_instruction: String,
    pathway_instruction: String,
}

impl TriageOrchestrator {
    /// Build from a triage policy. Rejects policies that leave safety
    /// behavior ill-defined.
    pub fn new(policy: &TriagePolicy, oracle: Arc<dyn ReasoningOracle>) -> Result<Self, AgentError> {
        if !(policy.confidence_threshold > 0.0 && policy.confidence_threshold <= 1.0) {
            return Err(AgentError::Configuration(format!(
                "confidence threshold must be in (0, 1], got {}",
                policy.confidence_threshold
            )));
        }
        if policy.history_window == 0 {
            return Err(AgentError::Configuration(
                "history window must be at least 1".to_string(),
            ));
        }
        if policy.max_consecutive_follow_ups == 0 {
            return Err(AgentError::Configuration(
                "follow-up cap must be at least 1".to_string(),
            ));
        }

        let lexicon = EmergencyLexicon::new(&policy.emergency_lexicon)?;
        tracing::info!(
            phrases = lexicon.len(),
            threshold = policy.confidence_threshold,
            window = policy.history_window,
            oracle = oracle.name(),
            "Triage orchestrator ready"
        );

        Ok(Self {
            oracle,
            lexicon,
            context_builder: ContextWindowBuilder::new(policy.history_window),
            validator: ResponseValidator::new(),
            planner: ActionPlanner::new(policy.max_action_steps),
            confidence_threshold: policy.confidence_threshold,
            max_consecutive_follow_ups: policy.max_consecutive_follow_ups,
            triage_instruction: prompts::triage_instruction(),
            pathway_instruction: prompts::pathway_instruction(),
        })
    }

    /// Build from full settings, validating all of them first
    pub fn from_settings(
        settings: &Settings,
        oracle: Arc<dyn ReasoningOracle>,
    ) -> Result<Self, AgentError> {
        settings.validate()?;
        Self::new(&settings.triage, oracle)
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Process one patient turn.
    ///
    /// Always returns a well-formed outcome unless `cancel` fires, in which
    /// case the in-flight oracle call is dropped and `AgentError::Cancelled`
    /// is returned.
    pub async fn process_turn(
        &self,
        conversation_id: &str,
        incoming: &ConversationTurn,
        history: &[ConversationTurn],
        media_refs: &[MediaReference],
        cancel: &CancellationToken,
    ) -> Result<OrchestrationOutcome, AgentError> {
        self.run(conversation_id, incoming, history, media_refs, cancel)
            .await
            .map(|report| report.outcome)
    }

    /// Like [`process_turn`](Self::process_turn) but also reports the path taken
    pub async fn run(
        &self,
        conversation_id: &str,
        incoming: &ConversationTurn,
        history: &[ConversationTurn],
        media_refs: &[MediaReference],
        cancel: &CancellationToken,
    ) -> Result<RunReport, AgentError> {
        let span = tracing::info_span!(
            "triage_turn",
            conversation_id = %conversation_id,
            history_turns = history.len()
        );
        self.execute(incoming, history, media_refs, cancel)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        incoming: &ConversationTurn,
        history: &[ConversationTurn],
        media_refs: &[MediaReference],
        cancel: &CancellationToken,
    ) -> Result<RunReport, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let mut run = Run::new();
        let trailing_follow_ups = count_trailing_follow_ups(history);

        run.enter(TriageState::Perceive);
        let context = self.context_builder.build(history, incoming, media_refs);

        run.enter(TriageState::EmergencyCheck);
        if let Some(phrase) = self.lexicon.find(&incoming.content) {
            tracing::warn!(phrase, "Emergency phrase detected");
            return Ok(self.escalate(run, EscalationReason::KeywordDetected, None));
        }

        if incoming.is_blank() {
            tracing::debug!("Empty incoming turn");
            return Ok(self.follow_up(
                run,
                messages::EMPTY_INPUT_FOLLOW_UP.to_string(),
                FollowUpOrigin::EmptyInput,
                trailing_follow_ups,
            ));
        }

        run.enter(TriageState::TriageReason);
        let assessment = match self.reason_triage(&mut run, &context, cancel).await? {
            Ok(TriageResult::Assessed(assessment)) => assessment,
            Ok(TriageResult::NeedsInfo { question }) => {
                return Ok(self.follow_up(run, question, FollowUpOrigin::Oracle, trailing_follow_ups));
            }
            Err(failure) => {
                record_validation_failure(ReasoningStage::Triage, &failure);
                return Ok(self.follow_up(
                    run,
                    messages::FALLBACK_FOLLOW_UP.to_string(),
                    FollowUpOrigin::Fallback,
                    trailing_follow_ups,
                ));
            }
        };

        run.enter(TriageState::ConfidenceGate);
        // Severity before confidence: a confident emergency still escalates
        if assessment.severity == Severity::Emergency {
            return Ok(self.escalate(run, EscalationReason::HighSeverity, Some(assessment)));
        }
        if assessment.confidence < self.confidence_threshold {
            tracing::info!(
                confidence = assessment.confidence,
                threshold = self.confidence_threshold,
                "Confidence below threshold"
            );
            return Ok(self.escalate(run, EscalationReason::LowConfidence, Some(assessment)));
        }

        run.enter(TriageState::PathwaySelect);
        let pathway = match self.reason_pathway(&mut run, &context, &assessment, cancel).await? {
            Ok(pathway) => apply_pathway_floor(pathway, assessment.severity),
            Err(failure) => {
                record_validation_failure(ReasoningStage::Pathway, &failure);
                CarePathway::fallback(assessment.severity)
            }
        };

        run.enter(TriageState::ActionPlan);
        let plan = self.planner.plan(&assessment, &pathway);

        run.enter(TriageState::Finalize);
        Ok(run.finish(OrchestrationOutcome::Finalized {
            assessment,
            pathway,
            plan,
        }))
    }

    /// Triage stage. The outer error is cancellation only; every other
    /// failure comes back as a `ValidationFailure`.
    async fn reason_triage(
        &self,
        run: &mut Run,
        context: &ConversationContext,
        cancel: &CancellationToken,
    ) -> Result<Result<TriageResult, ValidationFailure>, AgentError> {
        let request = OracleRequest {
            stage: ReasoningStage::Triage,
            instruction: &self.triage_instruction,
            context,
            subject: None,
            expected_fields: prompts::TRIAGE_FIELDS,
        };
        let raw = match self.invoke(run, &request, cancel).await? {
            Ok(raw) => raw,
            Err(failure) => return Ok(Err(failure)),
        };
        Ok(self.validator.validate_triage(&raw))
    }

    async fn reason_pathway(
        &self,
        run: &mut Run,
        context: &ConversationContext,
        assessment: &Assessment,
        cancel: &CancellationToken,
    ) -> Result<Result<CarePathway, ValidationFailure>, AgentError> {
        let subject = serde_json::to_string(assessment)
            .unwrap_or_else(|_| format!("severity: {}", assessment.severity));
        let request = OracleRequest {
            stage: ReasoningStage::Pathway,
            instruction: &self.pathway_instruction,
            context,
            subject: Some(&subject),
            expected_fields: prompts::PATHWAY_FIELDS,
        };
        let raw = match self.invoke(run, &request, cancel).await? {
            Ok(raw) => raw,
            Err(failure) => return Ok(Err(failure)),
        };
        Ok(self
            .validator
            .validate_pathway(&raw)
            .and_then(|pathway| {
                check_pathway_consistency(&pathway, assessment.severity).map(|_| pathway)
            }))
    }

    /// Call the oracle; oracle errors other than cancellation become
    /// validation failures so both stages degrade the same way.
    async fn invoke(
        &self,
        run: &mut Run,
        request: &OracleRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Result<String, ValidationFailure>, AgentError> {
        run.oracle_calls += 1;
        match self.oracle.invoke(request, cancel).await {
            Ok(raw) => Ok(Ok(raw)),
            Err(OracleError::Cancelled) => {
                tracing::info!(stage = %request.stage, "Turn cancelled during oracle call");
                Err(AgentError::Cancelled)
            }
            Err(e) => Ok(Err(ValidationFailure::new(
                ValidationReason::OracleFailure,
                format!("oracle {}: {}", e.kind(), e),
            ))),
        }
    }

    fn follow_up(
        &self,
        mut run: Run,
        question: String,
        origin: FollowUpOrigin,
        trailing_follow_ups: usize,
    ) -> RunReport {
        if trailing_follow_ups >= self.max_consecutive_follow_ups {
            tracing::warn!(
                trailing_follow_ups,
                cap = self.max_consecutive_follow_ups,
                "Follow-up cap reached"
            );
            return self.escalate(run, EscalationReason::FollowUpLimit, None);
        }

        run.enter(TriageState::AskFollowUp);
        run.finish(OrchestrationOutcome::FollowUp { question, origin })
    }

    fn escalate(
        &self,
        mut run: Run,
        reason: EscalationReason,
        assessment: Option<Assessment>,
    ) -> RunReport {
        let immediate_action = match reason {
            _ if reason.is_emergency() => messages::EMERGENCY_ACTION,
            EscalationReason::FollowUpLimit => messages::FOLLOW_UP_LIMIT_ACTION,
            _ => messages::LOW_CONFIDENCE_ACTION,
        };

        run.enter(TriageState::Escalate);
        run.finish(OrchestrationOutcome::Escalated {
            reason,
            immediate_action: immediate_action.to_string(),
            assessment,
        })
    }
}

fn record_validation_failure(stage: ReasoningStage, failure: &ValidationFailure) {
    metrics::counter!(
        "triage_validation_failures_total",
        "stage" => stage.as_str(),
        "reason" => failure.reason.as_str()
    )
    .increment(1);
    tracing::warn!(
        reason = "validation-failure",
        stage = %stage,
        code = failure.reason.as_str(),
        detail = %failure.detail,
        "Oracle output rejected, using fallback"
    );
}
