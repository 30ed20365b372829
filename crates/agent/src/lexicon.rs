//! Emergency lexicon matcher
//!
//! All phrases compile into one case-insensitive regex alternation, so a scan
//! is a single linear pass over the text however many phrases there are.
//! Phrases must start on a word boundary but may end mid-word, so inflected
//! forms match ("seizures", "overdosed"). Whitespace inside a phrase matches
//! any run of whitespace and apostrophes are optional ("cant breathe").

use regex::{Regex, RegexBuilder};

use crate::AgentError;

/// Precompiled emergency phrase matcher. Immutable and cheap to share.
#[derive(Debug, Clone)]
pub struct EmergencyLexicon {
    pattern: Regex,
    phrases: Vec<String>,
}

impl EmergencyLexicon {
    /// Compile a lexicon. Empty lexicons and blank phrases are configuration errors.
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Result<Self, AgentError> {
        if phrases.is_empty() {
            return Err(AgentError::Configuration(
                "emergency lexicon cannot be empty".to_string(),
            ));
        }

        let mut normalized: Vec<String> = Vec::with_capacity(phrases.len());
        for phrase in phrases {
            let phrase = phrase
                .as_ref()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            if phrase.is_empty() {
                return Err(AgentError::Configuration(
                    "emergency lexicon contains a blank phrase".to_string(),
                ));
            }
            if !normalized.contains(&phrase) {
                normalized.push(phrase);
            }
        }

        // Longest first so overlapping phrases report the most specific match
        let mut ordered = normalized.clone();
        ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let alternation = ordered
            .iter()
            .map(|phrase| phrase_pattern(phrase))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = RegexBuilder::new(&format!("(?:{})", alternation))
            .case_insensitive(true)
            .build()
            .map_err(|e| AgentError::Configuration(format!("invalid emergency lexicon: {}", e)))?;

        Ok(Self {
            pattern,
            phrases: normalized,
        })
    }

    /// True if any emergency phrase occurs in `text`
    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// The first emergency phrase occurrence, as written in `text`
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.pattern.find(text).map(|m| m.as_str())
    }

    /// Normalized phrases, in configuration order
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Regex for one normalized phrase. A phrase starting with a word character
/// needs a word boundary before it; one ending with a word character absorbs
/// the rest of that word.
fn phrase_pattern(phrase: &str) -> String {
    let body = phrase
        .split(' ')
        .map(|word| {
            word.split(['\'', '’'])
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("['’]?")
        })
        .collect::<Vec<_>>()
        .join(r"\s+");

    let is_word = |c: Option<char>| c.map_or(false, |c| c.is_alphanumeric() || c == '_');
    let start = if is_word(phrase.chars().next()) { r"\b" } else { "" };
    let end = if is_word(phrase.chars().last()) { r"\w*" } else { "" };
    format!("{}{}{}", start, body, end)
}
