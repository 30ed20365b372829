//! Conversation types: turns, media references and the per-run context window

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The patient describing symptoms
    Patient,
    /// The triage assistant
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::Patient => "patient",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an assistant turn was
///
/// Follow-up questions are tagged so the orchestrator can count consecutive
/// clarifying rounds from caller-owned history alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TurnKind {
    #[default]
    Message,
    FollowUp,
}

/// Kind of media attached to a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Document,
    #[serde(other)]
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Other => "other",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to media held by an external store. Never carries the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub kind: MediaKind,
    /// Payload size in bytes, when the caller knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Opaque identifier in the media store
    pub id: String,
}

impl MediaReference {
    pub fn new(kind: MediaKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            size_bytes: None,
            id: id.into(),
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }
}

/// A single recorded turn. Appended to history by the caller, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default)]
    pub kind: TurnKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            kind: TurnKind::Message,
            media: Vec::new(),
            timestamp: None,
        }
    }

    /// Create a patient turn
    pub fn patient(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Patient, content)
    }

    /// Create a plain assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    /// Create an assistant turn holding a clarifying question
    pub fn follow_up(question: impl Into<String>) -> Self {
        Self {
            kind: TurnKind::FollowUp,
            ..Self::new(TurnRole::Assistant, question)
        }
    }

    pub fn with_media(mut self, media: Vec<MediaReference>) -> Self {
        self.media = media;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn is_follow_up(&self) -> bool {
        self.role == TurnRole::Assistant && self.kind == TurnKind::FollowUp
    }

    /// True when the turn has no usable text
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Read-only snapshot handed to every reasoning call.
///
/// Built fresh for each run by the context window builder; there is no way to
/// mutate it after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationContext {
    history: Vec<ConversationTurn>,
    incoming: ConversationTurn,
    media_summary: Option<String>,
    dropped_turns: usize,
}

impl ConversationContext {
    pub fn new(
        history: Vec<ConversationTurn>,
        incoming: ConversationTurn,
        media_summary: Option<String>,
        dropped_turns: usize,
    ) -> Self {
        Self {
            history,
            incoming,
            media_summary,
            dropped_turns,
        }
    }

    /// Recent turns, oldest first
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// The turn being processed in this run
    pub fn incoming(&self) -> &ConversationTurn {
        &self.incoming
    }

    /// Type and count summary of media on the incoming turn
    pub fn media_summary(&self) -> Option<&str> {
        self.media_summary.as_deref()
    }

    /// Number of older turns that fell outside the window
    pub fn dropped_turns(&self) -> usize {
        self.dropped_turns
    }

    pub fn turn_count(&self) -> usize {
        self.history.len() + 1
    }
}
