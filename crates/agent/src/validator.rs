//! Response validator
//!
//! Turns raw oracle text into typed results or a [`ValidationFailure`].
//!
//! Parsing is two-step: the whole text as a JSON object, then the first
//! balanced `{...}` block found in it (models sometimes wrap the object in
//! prose or code fences). Nothing partially populated ever leaves this module.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use triage_core::{Assessment, CarePathway, PathwayCategory, PathwayOrigin, Severity, TriageResult};

type Object = Map<String, Value>;

/// Why a response was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationReason {
    /// No JSON object could be parsed
    Unparseable,
    /// A required field is absent or blank
    MissingField,
    /// A field has the wrong type or an out-of-range value
    OutOfRange,
    InvalidSeverity,
    InvalidCategory,
    /// Fields contradict each other
    Inconsistent,
    /// The oracle call itself failed
    OracleFailure,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::Unparseable => "unparseable",
            ValidationReason::MissingField => "missing-field",
            ValidationReason::OutOfRange => "out-of-range",
            ValidationReason::InvalidSeverity => "invalid-severity",
            ValidationReason::InvalidCategory => "invalid-category",
            ValidationReason::Inconsistent => "inconsistent",
            ValidationReason::OracleFailure => "oracle-failure",
        }
    }
}

impl std::fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}: {detail}")]
pub struct ValidationFailure {
    pub reason: ValidationReason,
    pub detail: String,
}

impl ValidationFailure {
    pub fn new(reason: ValidationReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    fn missing(field: &str) -> Self {
        Self::new(ValidationReason::MissingField, format!("'{}' is missing or blank", field))
    }

    fn wrong_type(field: &str, expected: &str) -> Self {
        Self::new(
            ValidationReason::OutOfRange,
            format!("'{}' must be {}", field, expected),
        )
    }
}

/// Alternate key spellings accepted for canonical field names
static FIELD_ALIASES: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(
        "needs_more_info",
        &["needs_more_info", "needs_more_information"] as &[_],
    );
    map.insert("follow_up_question", &["follow_up_question", "question"] as &[_]);
    map.insert(
        "category",
        &["category", "recommended_pathway", "pathway"] as &[_],
    );
    map.insert(
        "urgency_window",
        &["urgency_window", "urgency_timeframe", "timeframe"] as &[_],
    );
    map.insert("rationale", &["rationale", "reasoning"] as &[_]);
    map
});

/// Phrasing that states a diagnosis as fact
static DIAGNOSIS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\byou have\s+(?:a\s+|an\s+)?\w+",
        r"(?i)\byou (?:are|have been)\s+diagnosed",
        r"(?i)\bit['’]?s (?:definitely|clearly|certainly)\s+\w+",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

fn lookup<'a>(object: &'a Object, field: &str) -> Option<&'a Value> {
    let value = match FIELD_ALIASES.get(field) {
        Some(names) => names.iter().find_map(|name| object.get(*name)),
        None => object.get(field),
    };
    value.filter(|value| !value.is_null())
}

/// Parse `raw` into a JSON object: direct parse first, then the first
/// balanced `{...}` block, parsed once.
pub fn parse_object(raw: &str) -> Result<Object, ValidationFailure> {
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw.trim()) {
        return Ok(object);
    }

    let candidate = first_object_span(raw).ok_or_else(|| {
        ValidationFailure::new(ValidationReason::Unparseable, "no JSON object in response")
    })?;

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(ValidationFailure::new(
            ValidationReason::Unparseable,
            "extracted block is not an object",
        )),
        Err(e) => Err(ValidationFailure::new(
            ValidationReason::Unparseable,
            format!("extracted block failed to parse: {}", e),
        )),
    }
}

/// Byte span of the first balanced `{...}` in `text`, skipping braces inside strings
fn first_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse and check that every expected field is present
pub fn validate(raw: &str, expected_fields: &[&str]) -> Result<Object, ValidationFailure> {
    let object = parse_object(raw)?;
    if let Some(missing) = expected_fields
        .iter()
        .find(|field| lookup(&object, field).is_none())
    {
        return Err(ValidationFailure::missing(missing));
    }
    Ok(object)
}

fn required_str<'a>(object: &'a Object, field: &str) -> Result<&'a str, ValidationFailure> {
    match lookup(object, field) {
        None => Err(ValidationFailure::missing(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationFailure::missing(field)),
        Some(Value::String(s)) => Ok(s.trim()),
        Some(_) => Err(ValidationFailure::wrong_type(field, "a string")),
    }
}

fn optional_str(object: &Object, field: &str) -> Option<String> {
    match lookup(object, field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Array(items)) => {
            let joined = string_items(items).join("; ");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn string_items(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Lenient list: non-string or blank items are skipped, not fatal
fn optional_list(object: &Object, field: &str) -> Vec<String> {
    match lookup(object, field) {
        Some(Value::Array(items)) => {
            let kept = string_items(items);
            if kept.len() < items.len() {
                tracing::warn!(
                    field,
                    skipped = items.len() - kept.len(),
                    "Skipped unusable list items in oracle response"
                );
            }
            kept
        }
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn flag(object: &Object, field: &str) -> Result<bool, ValidationFailure> {
    match lookup(object, field) {
        None => Err(ValidationFailure::missing(field)),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(true),
            "false" | "no" => Ok(false),
            _ => Err(ValidationFailure::wrong_type(field, "a boolean")),
        },
        Some(_) => Err(ValidationFailure::wrong_type(field, "a boolean")),
    }
}

/// True when text states a diagnosis as fact
pub fn contains_diagnostic_language(text: &str) -> bool {
    DIAGNOSIS_PATTERNS.iter().any(|pattern| pattern.is_match(text))
}

/// Schema checks for both reasoning stages
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    min_conditions: usize,
    max_conditions: usize,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        use triage_config::constants::triage;
        Self {
            min_conditions: triage::MIN_CONDITIONS,
            max_conditions: triage::MAX_CONDITIONS,
        }
    }
}

impl ResponseValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a triage stage response
    pub fn validate_triage(&self, raw: &str) -> Result<TriageResult, ValidationFailure> {
        let object = validate(raw, triage_config::prompts::TRIAGE_FIELDS)?;

        if flag(&object, "needs_more_info")? {
            let question = required_str(&object, "follow_up_question")
                .or_else(|_| required_str(&object, "recommendation"))
                .map_err(|_| ValidationFailure::missing("follow_up_question"))?;
            return Ok(TriageResult::NeedsInfo {
                question: question.to_string(),
            });
        }

        self.assessment(&object).map(TriageResult::Assessed)
    }

    fn assessment(&self, object: &Object) -> Result<Assessment, ValidationFailure> {
        let severity_label = required_str(object, "severity")?;
        let severity = Severity::parse(severity_label).ok_or_else(|| {
            ValidationFailure::new(
                ValidationReason::InvalidSeverity,
                format!("'{}' is not routine, urgent or emergency", severity_label),
            )
        })?;

        let mut possible_conditions = match lookup(object, "possible_conditions") {
            None => return Err(ValidationFailure::missing("possible_conditions")),
            Some(Value::Array(items)) => string_items(items),
            Some(_) => return Err(ValidationFailure::wrong_type("possible_conditions", "a list")),
        };
        if possible_conditions.len() < self.min_conditions {
            return Err(ValidationFailure::new(
                ValidationReason::OutOfRange,
                format!(
                    "expected at least {} possible conditions, got {}",
                    self.min_conditions,
                    possible_conditions.len()
                ),
            ));
        }
        if possible_conditions.len() > self.max_conditions {
            tracing::warn!(
                received = possible_conditions.len(),
                kept = self.max_conditions,
                "Truncated possible conditions"
            );
            possible_conditions.truncate(self.max_conditions);
        }

        let reasoning = required_str(object, "reasoning")?.to_string();

        let confidence = match lookup(object, "confidence") {
            None => return Err(ValidationFailure::missing("confidence")),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| ValidationFailure::wrong_type("confidence", "a number"))?,
        };
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationFailure::new(
                ValidationReason::OutOfRange,
                format!("confidence {} is outside [0, 1]", confidence),
            ));
        }

        let recommendation = optional_str(object, "recommendation");

        let mut medications = optional_list(object, "medications");
        if severity != Severity::Routine && !medications.is_empty() {
            tracing::debug!(%severity, "Dropped medication suggestions for non-routine assessment");
            medications.clear();
        }

        let needs_disclaimer = contains_diagnostic_language(&reasoning)
            || recommendation
                .as_deref()
                .map_or(false, contains_diagnostic_language);
        if needs_disclaimer {
            tracing::warn!(%severity, "Oracle reasoning reads like a diagnosis");
        }

        Ok(Assessment {
            severity,
            possible_conditions,
            reasoning,
            confidence: confidence as f32,
            recommendation,
            suggested_actions: optional_list(object, "suggested_actions"),
            medications,
            needs_disclaimer,
        })
    }

    /// Validate a pathway stage response
    pub fn validate_pathway(&self, raw: &str) -> Result<CarePathway, ValidationFailure> {
        let object = validate(raw, triage_config::prompts::PATHWAY_FIELDS)?;

        let label = required_str(&object, "category")?;
        let category = PathwayCategory::parse(label).ok_or_else(|| {
            ValidationFailure::new(
                ValidationReason::InvalidCategory,
                format!("'{}' is not a known care pathway", label),
            )
        })?;

        Ok(CarePathway {
            category,
            urgency_window: required_str(&object, "urgency_window")?.to_string(),
            rationale: required_str(&object, "rationale")?.to_string(),
            safety_netting: optional_str(&object, "safety_netting"),
            specific_actions: optional_list(&object, "specific_actions"),
            origin: PathwayOrigin::Oracle,
        })
    }
}

/// Reject pathways that contradict the assessment they were derived from
pub fn check_pathway_consistency(
    pathway: &CarePathway,
    severity: Severity,
) -> Result<(), ValidationFailure> {
    if pathway.category == PathwayCategory::EmergencyCall && severity == Severity::Routine {
        return Err(ValidationFailure::new(
            ValidationReason::Inconsistent,
            "emergency-call pathway for a routine assessment",
        ));
    }
    Ok(())
}
