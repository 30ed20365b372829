//! End-to-end orchestrator scenarios against a scripted oracle
//!
//! The oracle is replaced by a queue of canned responses so every run is
//! deterministic and the number of oracle calls can be asserted.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use triage_agent::{AgentError, TriageOrchestrator, TriageState};
use triage_config::constants::messages;
use triage_config::TriagePolicy;
use triage_core::{
    ConversationTurn, EscalationReason, FollowUpOrigin, MediaKind, MediaReference, OracleError,
    OracleRequest, OrchestrationOutcome, PathwayCategory, PathwayOrigin, ReasoningOracle,
    ReasoningStage, Severity,
};

enum Reply {
    Text(String),
    Fail(OracleError),
    /// Block until the caller cancels
    Hang,
}

struct ScriptedOracle {
    replies: Mutex<VecDeque<Reply>>,
    stages: Mutex<Vec<ReasoningStage>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            stages: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn stages(&self) -> Vec<ReasoningStage> {
        self.stages.lock().clone()
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn invoke(
        &self,
        request: &OracleRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.stages.lock().push(request.stage);
        let reply = self.replies.lock().pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Hang) | None => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(OracleError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        Err(OracleError::Timeout(Duration::from_secs(30)))
                    }
                }
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn text(s: &str) -> Reply {
    Reply::Text(s.to_string())
}

fn assessment_json(severity: &str, confidence: f64) -> Reply {
    Reply::Text(format!(
        r#"{{
            "needs_more_info": false,
            "severity": "{}",
            "possible_conditions": ["Viral pharyngitis", "Common cold"],
            "reasoning": "Sore throat and mild fever for two days without breathing trouble.",
            "confidence": {},
            "recommendation": "Rest, fluids and monitor your temperature.",
            "suggested_actions": ["Drink plenty of fluids"],
            "medications": ["Paracetamol"]
        }}"#,
        severity, confidence
    ))
}

fn pathway_json(category: &str) -> Reply {
    Reply::Text(format!(
        r#"Here is the pathway:
        {{
            "category": "{}",
            "urgency_window": "within 5-7 days",
            "rationale": "Symptoms are mild and likely self-limiting.",
            "safety_netting": "your fever exceeds 39C or you struggle to swallow"
        }}"#,
        category
    ))
}

fn orchestrator(oracle: Arc<ScriptedOracle>) -> TriageOrchestrator {
    TriageOrchestrator::new(&TriagePolicy::default(), oracle).unwrap()
}

async fn run_turn(
    orchestrator: &TriageOrchestrator,
    incoming: &str,
    history: &[ConversationTurn],
) -> Result<OrchestrationOutcome, AgentError> {
    orchestrator
        .process_turn(
            "conv-test",
            &ConversationTurn::patient(incoming),
            history,
            &[],
            &CancellationToken::new(),
        )
        .await
}

/// Fields of every WARN event emitted while installed
#[derive(Clone, Default)]
struct WarnEvents(Arc<Mutex<Vec<HashMap<String, String>>>>);

impl WarnEvents {
    fn with_reason(&self, reason: &str) -> Vec<HashMap<String, String>> {
        self.0
            .lock()
            .iter()
            .filter(|fields| fields.get("reason").map(String::as_str) == Some(reason))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct FieldMap(HashMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for WarnEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            let mut fields = FieldMap::default();
            event.record(&mut fields);
            self.0.lock().push(fields.0);
        }
    }
}

/// Counters only; gauges and histograms are dropped
#[derive(Default)]
struct CountingRecorder {
    counters: Mutex<Vec<(Key, Arc<AtomicU64>)>>,
}

impl CountingRecorder {
    fn count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|(key, _)| {
                key.name() == name
                    && labels.iter().all(|(k, v)| {
                        key.labels().any(|label| label.key() == *k && label.value() == *v)
                    })
            })
            .map(|(_, value)| value.load(Ordering::SeqCst))
            .sum()
    }
}

impl Recorder for CountingRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let mut counters = self.counters.lock();
        let value = match counters.iter().find(|(existing, _)| existing == key) {
            Some((_, value)) => value.clone(),
            None => {
                let value = Arc::new(AtomicU64::new(0));
                counters.push((key.clone(), value.clone()));
                value
            }
        };
        Counter::from_arc(value)
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

/// Run one turn on a current-thread runtime with a thread-local subscriber
/// and recorder, so logs and counters from parallel tests stay separate.
fn run_turn_observed(
    oracle: Arc<ScriptedOracle>,
    incoming: &str,
) -> (OrchestrationOutcome, WarnEvents, CountingRecorder) {
    let orchestrator = orchestrator(oracle);
    let events = WarnEvents::default();
    let recorder = CountingRecorder::default();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let subscriber = tracing_subscriber::registry().with(events.clone());
    let outcome = tracing::subscriber::with_default(subscriber, || {
        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(run_turn(&orchestrator, incoming, &[]))
        })
    })
    .unwrap();

    (outcome, events, recorder)
}

#[tokio::test]
async fn test_emergency_phrase_skips_oracle() {
    let oracle = ScriptedOracle::new(vec![assessment_json("routine", 0.9)]);
    let orchestrator = orchestrator(oracle.clone());

    let report = orchestrator
        .run(
            "conv-a",
            &ConversationTurn::patient("I have severe chest pain radiating to my left arm"),
            &[],
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome.escalation_reason(),
        Some(EscalationReason::KeywordDetected)
    );
    assert_eq!(report.oracle_calls, 0);
    assert_eq!(oracle.calls(), 0);
    assert_eq!(
        report.path,
        vec![
            TriageState::Start,
            TriageState::Perceive,
            TriageState::EmergencyCheck,
            TriageState::Escalate
        ]
    );
    match report.outcome {
        OrchestrationOutcome::Escalated {
            immediate_action,
            assessment,
            ..
        } => {
            assert_eq!(immediate_action, messages::EMERGENCY_ACTION);
            assert!(assessment.is_none());
        }
        other => panic!("expected escalation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_emergency_phrase_case_insensitive() {
    let oracle = ScriptedOracle::new(vec![]);
    let orchestrator = orchestrator(oracle.clone());

    let outcome = run_turn(&orchestrator, "My dad is UNRESPONSIVE and pale", &[])
        .await
        .unwrap();
    assert_eq!(
        outcome.escalation_reason(),
        Some(EscalationReason::KeywordDetected)
    );
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn test_plural_emergency_phrase_skips_oracle() {
    let oracle = ScriptedOracle::new(vec![]);
    let orchestrator = orchestrator(oracle.clone());

    let outcome = run_turn(&orchestrator, "I keep getting chest pains", &[])
        .await
        .unwrap();
    assert_eq!(
        outcome.escalation_reason(),
        Some(EscalationReason::KeywordDetected)
    );
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn test_emergency_phrase_in_history_only_is_not_rescreened() {
    let oracle = ScriptedOracle::new(vec![text(
        r#"{"needs_more_info": true, "follow_up_question": "Is the pain still there now?"}"#,
    )]);
    let orchestrator = orchestrator(oracle.clone());
    let history = vec![
        ConversationTurn::patient("Yesterday I had chest pain"),
        ConversationTurn::assistant(messages::EMERGENCY_ACTION),
    ];

    let outcome = run_turn(&orchestrator, "I feel better today", &history)
        .await
        .unwrap();
    assert!(!outcome.is_escalated());
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn test_needs_information_returns_question() {
    let oracle = ScriptedOracle::new(vec![text(
        r#"{"needs_more_info": true, "follow_up_question": "How long have you had this fever?"}"#,
    )]);
    let orchestrator = orchestrator(oracle.clone());

    let outcome = run_turn(&orchestrator, "I have a fever", &[]).await.unwrap();
    assert_eq!(
        outcome,
        OrchestrationOutcome::FollowUp {
            question: "How long have you had this fever?".to_string(),
            origin: FollowUpOrigin::Oracle,
        }
    );
    assert_eq!(oracle.stages(), vec![ReasoningStage::Triage]);

    // Appending the assistant turn marks it as a follow-up for the next run
    assert!(outcome.assistant_turn().is_follow_up());
}

#[tokio::test]
async fn test_confident_routine_assessment_finalizes_self_care() {
    let oracle = ScriptedOracle::new(vec![
        assessment_json("routine", 0.92),
        pathway_json("self-care"),
    ]);
    let orchestrator = orchestrator(oracle.clone());

    let report = orchestrator
        .run(
            "conv-c",
            &ConversationTurn::patient("Sore throat and a mild fever for two days"),
            &[],
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.oracle_calls, 2);
    assert_eq!(
        oracle.stages(),
        vec![ReasoningStage::Triage, ReasoningStage::Pathway]
    );
    assert_eq!(
        report.path,
        vec![
            TriageState::Start,
            TriageState::Perceive,
            TriageState::EmergencyCheck,
            TriageState::TriageReason,
            TriageState::ConfidenceGate,
            TriageState::PathwaySelect,
            TriageState::ActionPlan,
            TriageState::Finalize,
        ]
    );

    match report.outcome {
        OrchestrationOutcome::Finalized {
            assessment,
            pathway,
            plan,
        } => {
            assert_eq!(assessment.severity, Severity::Routine);
            assert_eq!(pathway.category, PathwayCategory::SelfCare);
            assert_eq!(pathway.origin, PathwayOrigin::Oracle);
            assert!(!plan.actions().is_empty());
            assert!(plan.steps().iter().any(|s| s.contains("Paracetamol")));
            assert_eq!(plan.steps().last().map(String::as_str), Some(messages::SAFETY_DISCLAIMER));
        }
        other => panic!("expected finalized outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_low_confidence_escalates() {
    let oracle = ScriptedOracle::new(vec![
        assessment_json("urgent", 0.4),
        pathway_json("schedule-visit"),
    ]);
    let orchestrator = orchestrator(oracle.clone());

    let outcome = run_turn(&orchestrator, "Stomach ache since this morning", &[])
        .await
        .unwrap();

    assert_eq!(
        outcome.escalation_reason(),
        Some(EscalationReason::LowConfidence)
    );
    // Pathway stage never runs after an escalation
    assert_eq!(oracle.calls(), 1);
    match outcome {
        OrchestrationOutcome::Escalated {
            immediate_action,
            assessment,
            ..
        } => {
            assert_eq!(immediate_action, messages::LOW_CONFIDENCE_ACTION);
            assert_eq!(assessment.map(|a| a.severity), Some(Severity::Urgent));
        }
        other => panic!("expected escalation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unparseable_response_falls_back_to_question() {
    let oracle = ScriptedOracle::new(vec![text("I'm sorry, I can't help with that ~~ <html>")]);
    let orchestrator = orchestrator(oracle.clone());

    let outcome = run_turn(&orchestrator, "My knee hurts", &[]).await.unwrap();
    assert_eq!(
        outcome,
        OrchestrationOutcome::FollowUp {
            question: messages::FALLBACK_FOLLOW_UP.to_string(),
            origin: FollowUpOrigin::Fallback,
        }
    );
}

#[tokio::test]
async fn test_oracle_failure_falls_back_to_question() {
    let oracle = ScriptedOracle::new(vec![Reply::Fail(OracleError::Unavailable(
        "connection refused".to_string(),
    ))]);
    let orchestrator = orchestrator(oracle.clone());

    let outcome = run_turn(&orchestrator, "My knee hurts", &[]).await.unwrap();
    assert!(matches!(
        outcome,
        OrchestrationOutcome::FollowUp {
            origin: FollowUpOrigin::Fallback,
            ..
        }
    ));
}

#[test]
fn test_unparseable_response_is_logged_and_counted() {
    let oracle = ScriptedOracle::new(vec![text("I'm sorry, I can't help with that ~~ <html>")]);

    let (outcome, events, recorder) = run_turn_observed(oracle, "My knee hurts");
    assert!(matches!(
        outcome,
        OrchestrationOutcome::FollowUp {
            origin: FollowUpOrigin::Fallback,
            ..
        }
    ));

    let warnings = events.with_reason("validation-failure");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["stage"], "triage");
    assert_eq!(warnings[0]["code"], "unparseable");
    assert_eq!(
        recorder.count(
            "triage_validation_failures_total",
            &[("stage", "triage"), ("reason", "unparseable")]
        ),
        1
    );
}

#[test]
fn test_oracle_failure_is_logged_and_counted() {
    let oracle = ScriptedOracle::new(vec![Reply::Fail(OracleError::Unavailable(
        "connection refused".to_string(),
    ))]);

    let (_, events, recorder) = run_turn_observed(oracle, "My knee hurts");

    let warnings = events.with_reason("validation-failure");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["stage"], "triage");
    assert_eq!(warnings[0]["code"], "oracle-failure");
    assert_eq!(
        recorder.count(
            "triage_validation_failures_total",
            &[("stage", "triage"), ("reason", "oracle-failure")]
        ),
        1
    );
    assert_eq!(
        recorder.count("triage_validation_failures_total", &[("reason", "unparseable")]),
        0
    );
}

#[test]
fn test_pathway_fallback_is_logged_and_counted() {
    let oracle = ScriptedOracle::new(vec![
        assessment_json("routine", 0.9),
        text(r#"{"category": "surgery", "urgency_window": "now", "rationale": "?"}"#),
    ]);

    let (outcome, events, recorder) = run_turn_observed(oracle, "Dry cough");
    match outcome {
        OrchestrationOutcome::Finalized { pathway, .. } => {
            assert_eq!(pathway.origin, PathwayOrigin::Fallback);
        }
        other => panic!("expected finalized outcome, got {:?}", other),
    }

    let warnings = events.with_reason("validation-failure");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["stage"], "pathway");
    assert_eq!(warnings[0]["code"], "invalid-category");
    assert_eq!(
        recorder.count(
            "triage_validation_failures_total",
            &[("stage", "pathway"), ("reason", "invalid-category")]
        ),
        1
    );
    assert_eq!(
        recorder.count("triage_validation_failures_total", &[("stage", "triage")]),
        0
    );
}

#[tokio::test]
async fn test_emergency_severity_escalates_regardless_of_confidence() {
    for confidence in [0.05, 0.99] {
        let oracle = ScriptedOracle::new(vec![
            assessment_json("emergency", confidence),
            pathway_json("self-care"),
        ]);
        let orchestrator = orchestrator(oracle.clone());

        let outcome = run_turn(&orchestrator, "Sudden weakness on one side of my face", &[])
            .await
            .unwrap();
        assert_eq!(
            outcome.escalation_reason(),
            Some(EscalationReason::HighSeverity),
            "confidence {}",
            confidence
        );
        assert_eq!(oracle.calls(), 1);
    }
}

#[tokio::test]
async fn test_confidence_at_threshold_proceeds() {
    let oracle = ScriptedOracle::new(vec![
        assessment_json("routine", 0.6),
        pathway_json("self-care"),
    ]);
    let orchestrator = orchestrator(oracle);

    let outcome = run_turn(&orchestrator, "Runny nose", &[]).await.unwrap();
    assert_eq!(outcome.kind(), "finalized");
}

#[tokio::test]
async fn test_weak_pathway_is_raised_to_severity_floor() {
    let oracle = ScriptedOracle::new(vec![
        assessment_json("urgent", 0.8),
        pathway_json("self_care_advice"),
    ]);
    let orchestrator = orchestrator(oracle);

    match run_turn(&orchestrator, "Ear pain with discharge", &[]).await.unwrap() {
        OrchestrationOutcome::Finalized { pathway, plan, .. } => {
            assert_eq!(pathway.category, PathwayCategory::ScheduleVisit);
            assert_eq!(pathway.origin, PathwayOrigin::Raised);
            // Medications were dropped for the urgent assessment
            assert!(!plan.steps().iter().any(|s| s.contains("Paracetamol")));
        }
        other => panic!("expected finalized outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_pathway_uses_fallback() {
    let oracle = ScriptedOracle::new(vec![
        assessment_json("routine", 0.9),
        text(r#"{"category": "surgery", "urgency_window": "now", "rationale": "?"}"#),
    ]);
    let orchestrator = orchestrator(oracle);

    match run_turn(&orchestrator, "Dry cough", &[]).await.unwrap() {
        OrchestrationOutcome::Finalized { pathway, .. } => {
            assert_eq!(pathway.category, PathwayCategory::ScheduleVisit);
            assert_eq!(pathway.origin, PathwayOrigin::Fallback);
            assert_eq!(pathway.urgency_window, "within 1-2 weeks");
        }
        other => panic!("expected finalized outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_inconsistent_pathway_uses_fallback() {
    let oracle = ScriptedOracle::new(vec![
        assessment_json("routine", 0.9),
        pathway_json("emergency-call"),
    ]);
    let orchestrator = orchestrator(oracle);

    match run_turn(&orchestrator, "Dry cough", &[]).await.unwrap() {
        OrchestrationOutcome::Finalized { pathway, .. } => {
            assert_eq!(pathway.origin, PathwayOrigin::Fallback);
            assert_ne!(pathway.category, PathwayCategory::EmergencyCall);
        }
        other => panic!("expected finalized outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_follow_up_cap_escalates() {
    let oracle = ScriptedOracle::new(vec![text(
        r#"{"needs_more_info": true, "follow_up_question": "Anything else?"}"#,
    )]);
    let orchestrator = orchestrator(oracle.clone());
    let history = vec![
        ConversationTurn::patient("I feel unwell"),
        ConversationTurn::follow_up("Where does it hurt?"),
        ConversationTurn::patient("Everywhere"),
        ConversationTurn::follow_up("Since when?"),
        ConversationTurn::patient("A while"),
        ConversationTurn::follow_up("Any fever?"),
    ];

    let outcome = run_turn(&orchestrator, "Not sure", &history).await.unwrap();
    assert_eq!(
        outcome.escalation_reason(),
        Some(EscalationReason::FollowUpLimit)
    );
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn test_empty_input_asks_without_oracle() {
    let oracle = ScriptedOracle::new(vec![]);
    let orchestrator = orchestrator(oracle.clone());

    let outcome = orchestrator
        .process_turn(
            "conv-empty",
            &ConversationTurn::patient("   "),
            &[],
            &[MediaReference::new(MediaKind::Image, "img-1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        OrchestrationOutcome::FollowUp {
            question: messages::EMPTY_INPUT_FOLLOW_UP.to_string(),
            origin: FollowUpOrigin::EmptyInput,
        }
    );
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn test_same_inputs_same_outcome() {
    let script = || {
        vec![
            assessment_json("routine", 0.92),
            pathway_json("self-care"),
        ]
    };
    let first = run_turn(&orchestrator(ScriptedOracle::new(script())), "Sore throat", &[])
        .await
        .unwrap();
    let second = run_turn(&orchestrator(ScriptedOracle::new(script())), "Sore throat", &[])
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_cancellation_stops_the_turn() {
    let oracle = ScriptedOracle::new(vec![Reply::Hang]);
    let orchestrator = orchestrator(oracle.clone());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.process_turn(
            "conv-cancel",
            &ConversationTurn::patient("Headache"),
            &[],
            &[],
            &cancel,
        ),
    )
    .await
    .expect("cancellation should end the turn promptly");

    assert!(matches!(result, Err(AgentError::Cancelled)));
}

#[tokio::test]
async fn test_invalid_policy_rejected() {
    let oracle = ScriptedOracle::new(vec![]);

    let policy = TriagePolicy {
        confidence_threshold: 1.5,
        ..TriagePolicy::default()
    };
    assert!(matches!(
        TriageOrchestrator::new(&policy, oracle.clone()),
        Err(AgentError::Configuration(_))
    ));

    let policy = TriagePolicy {
        emergency_lexicon: Vec::new(),
        ..TriagePolicy::default()
    };
    assert!(matches!(
        TriageOrchestrator::new(&policy, oracle),
        Err(AgentError::Configuration(_))
    ));
}
