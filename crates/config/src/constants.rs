//! Centralized constants for the triage assistant
//!
//! Single source of truth for safety policy defaults, oracle timings and the
//! fixed patient-facing messages. Settings defaults read from here.

/// Triage policy defaults
pub mod triage {
    /// Assessments below this confidence escalate
    pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

    /// Number of prior turns handed to each reasoning call
    pub const HISTORY_WINDOW: usize = 5;

    /// Consecutive clarifying questions allowed before escalation
    pub const MAX_CONSECUTIVE_FOLLOW_UPS: usize = 3;

    /// Upper bound on action plan steps, disclaimer excluded
    pub const MAX_ACTION_STEPS: usize = 8;

    /// Possible conditions an assessment must list
    pub const MIN_CONDITIONS: usize = 2;
    pub const MAX_CONDITIONS: usize = 3;

    /// Longest turn text passed to the oracle, in graphemes
    pub const MAX_TURN_GRAPHEMES: usize = 2_000;
}

/// Default emergency lexicon
///
/// Matched case-insensitively against the incoming turn. Any hit escalates
/// without consulting the oracle.
pub const EMERGENCY_LEXICON: &[&str] = &[
    "chest pain",
    "difficulty breathing",
    "shortness of breath",
    "can't breathe",
    "unconscious",
    "unresponsive",
    "severe bleeding",
    "poisoning",
    "overdose",
    "stroke",
    "heart attack",
    "seizure",
    "allergic reaction",
    "anaphylaxis",
];

/// Oracle call timings (ms)
pub mod oracle {
    /// Timeout before the first successful call (model may be loading)
    pub const COLD_TIMEOUT_MS: u64 = 30_000;

    /// Timeout once the model has answered at least once
    pub const WARM_TIMEOUT_MS: u64 = 10_000;

    /// Pause before the single retry on a transient failure
    pub const RETRY_BACKOFF_MS: u64 = 250;

    /// Low temperature keeps structured output stable
    pub const TEMPERATURE: f32 = 0.3;

    pub const MAX_TOKENS: u32 = 1024;

    pub const DEFAULT_MODEL: &str = "mistral:7b-instruct";
}

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Ollama endpoint
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";

    /// OpenAI-compatible API endpoint
    pub const OPENAI_DEFAULT: &str = "https://api.openai.com/v1";
}

/// Fixed patient-facing text
pub mod messages {
    /// Appended as the final step of every action plan
    pub const SAFETY_DISCLAIMER: &str = "This is not a substitute for professional medical advice. \
        Always consult a qualified healthcare provider for diagnosis and treatment.";

    /// Asked when oracle output cannot be used
    pub const FALLBACK_FOLLOW_UP: &str = "Could you please tell me more about your symptoms? \
        How long have you been experiencing this, and are there any other symptoms?";

    /// Asked when the incoming turn has no text
    pub const EMPTY_INPUT_FOLLOW_UP: &str =
        "Could you describe the symptoms you are experiencing and when they started?";

    /// Immediate action for keyword and high-severity escalations
    pub const EMERGENCY_ACTION: &str = "Call emergency services now or go to the nearest \
        emergency department. If someone is with you, ask them to stay with you.";

    /// Immediate action when confidence is too low to recommend anything
    pub const LOW_CONFIDENCE_ACTION: &str = "We could not assess your symptoms with enough \
        confidence. Please contact a healthcare provider today so a clinician can review them.";

    /// Immediate action when clarifying questions did not converge
    pub const FOLLOW_UP_LIMIT_ACTION: &str = "We need a clinician to review your symptoms \
        directly. Please contact a healthcare provider today.";

    /// Added to the plan when the reasoning reads like a diagnosis
    pub const DIAGNOSIS_CAVEAT: &str =
        "The conditions above are possibilities only, not a diagnosis.";
}
