//! Context window builder
//!
//! Produces the read-only [`ConversationContext`] every reasoning call sees:
//! the last N prior turns, the incoming turn, and a type/count summary of the
//! media attached to the incoming turn. Pure and deterministic.

use std::collections::{BTreeMap, HashSet};

use triage_core::{ConversationContext, ConversationTurn, MediaKind, MediaReference};
use unicode_segmentation::UnicodeSegmentation;

/// Builds bounded conversation contexts
#[derive(Debug, Clone)]
pub struct ContextWindowBuilder {
    window: usize,
    max_turn_graphemes: usize,
}

impl ContextWindowBuilder {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            max_turn_graphemes: triage_config::constants::triage::MAX_TURN_GRAPHEMES,
        }
    }

    /// Cap on the text length of any single turn
    pub fn with_max_turn_graphemes(mut self, max: usize) -> Self {
        self.max_turn_graphemes = max;
        self
    }

    /// Build the context for one run.
    ///
    /// `media_refs` are merged with media already on `incoming`; duplicates
    /// (same id) are counted once.
    pub fn build(
        &self,
        history: &[ConversationTurn],
        incoming: &ConversationTurn,
        media_refs: &[MediaReference],
    ) -> ConversationContext {
        let start = history.len().saturating_sub(self.window);
        let recent = history[start..]
            .iter()
            .map(|turn| self.bounded(turn.clone()))
            .collect();

        let mut seen = HashSet::new();
        let media: Vec<MediaReference> = incoming
            .media
            .iter()
            .chain(media_refs)
            .filter(|m| seen.insert(m.id.as_str()))
            .cloned()
            .collect();

        let media_summary = summarize_media(&media);
        let incoming = self.bounded(incoming.clone()).with_media(media);

        ConversationContext::new(recent, incoming, media_summary, start)
    }

    fn bounded(&self, mut turn: ConversationTurn) -> ConversationTurn {
        turn.content = truncate_graphemes(turn.content.trim(), self.max_turn_graphemes);
        turn
    }
}

fn truncate_graphemes(text: &str, max: usize) -> String {
    match text.grapheme_indices(true).nth(max) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

/// Summarize media as type and count, e.g. `[Patient attached 2 file(s): image x1, document x1]`
pub fn summarize_media(media: &[MediaReference]) -> Option<String> {
    if media.is_empty() {
        return None;
    }

    let mut counts: BTreeMap<MediaKind, usize> = BTreeMap::new();
    for reference in media {
        *counts.entry(reference.kind).or_insert(0) += 1;
    }

    let parts = counts
        .iter()
        .map(|(kind, count)| format!("{} x{}", kind, count))
        .collect::<Vec<_>>()
        .join(", ");

    Some(format!(
        "[Patient attached {} file(s): {}]",
        media.len(),
        parts
    ))
}

/// Number of clarifying questions the assistant has asked in a row.
///
/// Walks back from the newest turn; patient turns are skipped and any
/// assistant turn that was not a follow-up question ends the streak.
pub fn count_trailing_follow_ups(history: &[ConversationTurn]) -> usize {
    let mut count = 0;
    for turn in history.iter().rev() {
        match turn.role {
            triage_core::TurnRole::Patient => continue,
            triage_core::TurnRole::Assistant if turn.is_follow_up() => count += 1,
            triage_core::TurnRole::Assistant => break,
        }
    }
    count
}
