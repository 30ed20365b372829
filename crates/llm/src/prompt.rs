//! Prompt Building
//!
//! Turns an oracle request into chat messages: one system message carrying the
//! stage instruction, prior turns as chat history, then the incoming turn.

use std::fmt;

use serde::{Deserialize, Serialize};
use triage_core::{ConversationContext, ConversationTurn, OracleRequest, TurnRole};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl From<TurnRole> for Role {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::Patient => Role::User,
            TurnRole::Assistant => Role::Assistant,
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for Message {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role.into(),
            content: turn.content.clone(),
        }
    }
}

/// Prompt builder
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    messages: Vec<Message>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the full message list for one oracle request
    pub fn for_request(request: &OracleRequest<'_>) -> Vec<Message> {
        Self::new()
            .system_prompt(request.instruction, request.expected_fields)
            .with_context(request.context)
            .incoming(request.context, request.subject)
            .build()
    }

    /// Stage instruction plus the required response fields
    pub fn system_prompt(mut self, instruction: &str, expected_fields: &[&str]) -> Self {
        let mut content = instruction.trim_end().to_string();
        if !expected_fields.is_empty() {
            content.push_str(&format!(
                "\n\nThe JSON object MUST contain these fields: {}.",
                expected_fields.join(", ")
            ));
        }
        self.messages.push(Message::system(content));
        self
    }

    /// Prior turns as chat history, oldest first
    pub fn with_context(mut self, context: &ConversationContext) -> Self {
        if context.dropped_turns() > 0 {
            self.messages.push(Message::system(format!(
                "[{} earlier turn(s) omitted]",
                context.dropped_turns()
            )));
        }
        self.messages
            .extend(context.history().iter().filter(|t| !t.is_blank()).map(Message::from));
        self
    }

    /// The incoming turn, its media summary and the stage subject
    pub fn incoming(mut self, context: &ConversationContext, subject: Option<&str>) -> Self {
        let mut content = context.incoming().content.trim().to_string();

        if let Some(summary) = context.media_summary() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(summary);
        }

        if let Some(subject) = subject {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str("Triage assessment:\n");
            content.push_str(subject);
        }

        self.messages.push(Message::user(content));
        self
    }

    pub fn user_message(mut self, message: &str) -> Self {
        self.messages.push(Message::user(message));
        self
    }

    pub fn build(self) -> Vec<Message> {
        self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
