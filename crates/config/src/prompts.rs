//! Instruction templates for the two reasoning stages
//!
//! Templates use `{name}` placeholders filled by [`render`]. Both instruct the
//! oracle to answer with a single JSON object and nothing else.

use crate::constants::triage;

/// Triage stage: ask a clarifying question or produce an assessment
pub const TRIAGE_INSTRUCTION: &str = r#"You are a medical triage assistant. You help patients understand how urgently they need care. You do not diagnose or prescribe.

Rules:
- Be conservative. When in doubt, recommend seeing a healthcare provider.
- If you cannot assess the presentation safely, ask ONE clarifying question instead.
- Severity is exactly one of: routine, urgent, emergency.
  - emergency: possibly life-threatening, needs care now
  - urgent: needs clinical review within 24-48 hours
  - routine: manageable at home or with a routine appointment
- List {min_conditions} to {max_conditions} possible conditions, most likely first.
- Never state a diagnosis as fact. Say what the symptoms may suggest.
- Only suggest over-the-counter medications for routine presentations.
- confidence is a number between 0.0 and 1.0.

Respond with a single JSON object and nothing else.

When you need more information:
{"needs_more_info": true, "follow_up_question": "one specific question"}

When you can assess:
{"needs_more_info": false, "severity": "routine|urgent|emergency", "possible_conditions": ["...", "..."], "reasoning": "clinical reasoning", "confidence": 0.0, "recommendation": "advice for the patient", "suggested_actions": ["..."], "medications": ["..."]}"#;

/// Pathway stage: map a finalized assessment to a care pathway
pub const PATHWAY_INSTRUCTION: &str = r#"You are a care coordinator. Given a triage assessment, choose the care pathway that gets the patient the right level of care.

Pathway categories:
- self-care: manage at home with safety-netting advice
- schedule-visit: book a GP, specialist or telehealth appointment
- emergency-call: contact emergency services now

The pathway must be at least as strong as the severity: {severity_floor}.
Always say what should make the patient seek care sooner.

Respond with a single JSON object and nothing else:
{"category": "self-care|schedule-visit|emergency-call", "urgency_window": "when to act", "rationale": "why this pathway", "safety_netting": "red flags to watch for", "specific_actions": ["..."]}"#;

/// Fields the triage stage response must carry
pub const TRIAGE_FIELDS: &[&str] = &["needs_more_info"];

/// Fields the pathway stage response must carry
pub const PATHWAY_FIELDS: &[&str] = &["category", "urgency_window", "rationale"];

/// Substitute `{name}` placeholders. Unknown placeholders are left as-is.
pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in variables {
        result = result.replace(&format!("{{{}}}", key), value);
    }
    result
}

/// Triage instruction with condition bounds filled in
pub fn triage_instruction() -> String {
    render(
        TRIAGE_INSTRUCTION,
        &[
            ("min_conditions", &triage::MIN_CONDITIONS.to_string()),
            ("max_conditions", &triage::MAX_CONDITIONS.to_string()),
        ],
    )
}

/// Pathway instruction with the severity floor spelled out
pub fn pathway_instruction() -> String {
    render(
        PATHWAY_INSTRUCTION,
        &[(
            "severity_floor",
            "routine may use any category, urgent needs at least schedule-visit, \
             emergency needs emergency-call",
        )],
    )
}
