//! Triage domain types: severity, assessments, care pathways, action plans
//! and the orchestration outcome returned to callers.

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationTurn;

/// Triage risk tier, ordered by risk: `Routine < Urgent < Emergency`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Routine,
    Urgent,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Routine => "routine",
            Severity::Urgent => "urgent",
            Severity::Emergency => "emergency",
        }
    }

    /// Parse an oracle-supplied label. Only the three tiers are accepted.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "routine" => Some(Severity::Routine),
            "urgent" => Some(Severity::Urgent),
            "emergency" => Some(Severity::Emergency),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A complete triage assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub severity: Severity,
    /// Most likely conditions, most likely first (2-3 entries)
    pub possible_conditions: Vec<String>,
    pub reasoning: String,
    /// Oracle confidence in [0.0, 1.0]
    pub confidence: f32,
    /// Patient-facing recommendation text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_actions: Vec<String>,
    /// Over-the-counter suggestions, only kept for routine assessments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medications: Vec<String>,
    /// Set when the reasoning reads like a definitive diagnosis
    #[serde(default)]
    pub needs_disclaimer: bool,
}

/// Result of the triage reasoning step.
///
/// Either a clarifying question or a full assessment, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriageResult {
    NeedsInfo { question: String },
    Assessed(Assessment),
}

impl TriageResult {
    pub fn needs_more_information(&self) -> bool {
        matches!(self, TriageResult::NeedsInfo { .. })
    }

    pub fn assessment(&self) -> Option<&Assessment> {
        match self {
            TriageResult::Assessed(assessment) => Some(assessment),
            TriageResult::NeedsInfo { .. } => None,
        }
    }
}

/// Care pathway category, ordered by how much care it directs the patient to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathwayCategory {
    SelfCare,
    ScheduleVisit,
    EmergencyCall,
}

impl PathwayCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathwayCategory::SelfCare => "self-care",
            PathwayCategory::ScheduleVisit => "schedule-visit",
            PathwayCategory::EmergencyCall => "emergency-call",
        }
    }

    /// Parse an oracle-supplied category.
    ///
    /// Besides the three canonical labels this accepts the finer-grained
    /// pathway names care coordinators use and folds them into a category.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "self-care" | "self-care-advice" | "otc-treatment" | "no-action" => {
                Some(PathwayCategory::SelfCare)
            }
            "schedule-visit" | "schedule-follow-up" | "schedule-specialist" | "telehealth" => {
                Some(PathwayCategory::ScheduleVisit)
            }
            "emergency-call" | "emergency-escalation" => Some(PathwayCategory::EmergencyCall),
            _ => None,
        }
    }

    /// Weakest category that is still safe for a severity
    pub fn minimum_for(severity: Severity) -> Self {
        match severity {
            Severity::Routine => PathwayCategory::SelfCare,
            Severity::Urgent => PathwayCategory::ScheduleVisit,
            Severity::Emergency => PathwayCategory::EmergencyCall,
        }
    }
}

impl std::fmt::Display for PathwayCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a care pathway came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathwayOrigin {
    /// Returned by the reasoning oracle and validated
    Oracle,
    /// Oracle category was weaker than the severity allows and was raised
    Raised,
    /// Pathway stage failed; default schedule-visit pathway used
    Fallback,
}

/// Structured recommendation derived from a finalized assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarePathway {
    pub category: PathwayCategory,
    /// When the patient should act, e.g. "within 24 hours"
    pub urgency_window: String,
    pub rationale: String,
    /// Red flags that should make the patient seek care sooner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_netting: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specific_actions: Vec<String>,
    pub origin: PathwayOrigin,
}

impl CarePathway {
    /// Default pathway used when the pathway stage cannot produce one
    pub fn fallback(severity: Severity) -> Self {
        let urgency_window = match severity {
            Severity::Emergency => "immediately",
            Severity::Urgent => "within 24 hours",
            Severity::Routine => "within 1-2 weeks",
        };
        Self {
            category: PathwayCategory::ScheduleVisit,
            urgency_window: urgency_window.to_string(),
            rationale: "A clinician should review your symptoms to confirm the right next step."
                .to_string(),
            safety_netting: None,
            specific_actions: Vec::new(),
            origin: PathwayOrigin::Fallback,
        }
    }
}

/// Ordered, concrete steps for the patient.
///
/// The fixed safety disclaimer is always the final step. Deserialized plans
/// take their last step as the disclaimer and go through [`ActionPlan::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ActionPlanWire")]
pub struct ActionPlan {
    steps: Vec<String>,
}

#[derive(Deserialize)]
struct ActionPlanWire {
    steps: Vec<String>,
}

impl TryFrom<ActionPlanWire> for ActionPlan {
    type Error = String;

    fn try_from(wire: ActionPlanWire) -> Result<Self, Self::Error> {
        let mut steps = wire.steps;
        match steps.pop() {
            Some(disclaimer) if !disclaimer.trim().is_empty() => {
                Ok(ActionPlan::new(steps, &disclaimer))
            }
            _ => Err("action plan must end with a non-empty disclaimer".to_string()),
        }
    }
}

impl ActionPlan {
    pub fn new(steps: Vec<String>, disclaimer: &str) -> Self {
        let mut steps: Vec<String> = steps
            .into_iter()
            .filter(|step| !step.trim().is_empty() && step != disclaimer)
            .collect();
        steps.push(disclaimer.to_string());
        Self { steps }
    }

    /// All steps, disclaimer last
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Steps without the trailing disclaimer
    pub fn actions(&self) -> &[String] {
        &self.steps[..self.steps.len().saturating_sub(1)]
    }

    pub fn disclaimer(&self) -> &str {
        self.steps.last().map(String::as_str).unwrap_or_default()
    }
}

/// Why a run escalated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationReason {
    /// Emergency phrase in the incoming turn; no oracle call was made
    KeywordDetected,
    /// Oracle assessed the presentation as an emergency
    HighSeverity,
    /// Oracle confidence fell below the configured threshold
    LowConfidence,
    /// Too many consecutive clarifying questions without an assessment
    FollowUpLimit,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::KeywordDetected => "keyword-detected",
            EscalationReason::HighSeverity => "high-severity",
            EscalationReason::LowConfidence => "low-confidence",
            EscalationReason::FollowUpLimit => "follow-up-limit",
        }
    }

    /// Whether the patient must be told to contact emergency services
    pub fn is_emergency(&self) -> bool {
        matches!(
            self,
            EscalationReason::KeywordDetected | EscalationReason::HighSeverity
        )
    }
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a follow-up question was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpOrigin {
    /// The oracle asked for more information
    Oracle,
    /// Oracle output failed validation; a generic question was synthesized
    Fallback,
    /// The incoming turn had no text
    EmptyInput,
}

/// Terminal output of one orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrchestrationOutcome {
    FollowUp {
        question: String,
        origin: FollowUpOrigin,
    },
    Finalized {
        assessment: Assessment,
        pathway: CarePathway,
        plan: ActionPlan,
    },
    Escalated {
        reason: EscalationReason,
        immediate_action: String,
        /// Assessment that triggered the escalation, when the oracle produced one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assessment: Option<Assessment>,
    },
}

impl OrchestrationOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestrationOutcome::FollowUp { .. } => "follow_up",
            OrchestrationOutcome::Finalized { .. } => "finalized",
            OrchestrationOutcome::Escalated { .. } => "escalated",
        }
    }

    pub fn is_escalated(&self) -> bool {
        matches!(self, OrchestrationOutcome::Escalated { .. })
    }

    pub fn escalation_reason(&self) -> Option<EscalationReason> {
        match self {
            OrchestrationOutcome::Escalated { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// The assistant turn a caller should append to history for this outcome
    pub fn assistant_turn(&self) -> ConversationTurn {
        match self {
            OrchestrationOutcome::FollowUp { question, .. } => {
                ConversationTurn::follow_up(question.clone())
            }
            OrchestrationOutcome::Escalated {
                immediate_action, ..
            } => ConversationTurn::assistant(immediate_action.clone()),
            OrchestrationOutcome::Finalized {
                assessment,
                pathway,
                plan,
            } => {
                let mut text = assessment
                    .recommendation
                    .clone()
                    .unwrap_or_else(|| pathway.rationale.clone());
                for (index, step) in plan.steps().iter().enumerate() {
                    text.push_str(&format!("\n{}. {}", index + 1, step));
                }
                ConversationTurn::assistant(text)
            }
        }
    }
}
