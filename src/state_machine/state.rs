//! Chat state types

use crate::summary::FinancialSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated user handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }
}

/// Who authored a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the visible transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// True only for the placeholder currently receiving stream chunks
    pub streaming: bool,
}

impl Message {
    pub fn user(id: impl Into<String>, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            text: text.into(),
            created_at: at,
            streaming: false,
        }
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            text: text.into(),
            created_at: at,
            streaming: false,
        }
    }

    /// Empty assistant message awaiting streamed text
    pub fn placeholder(id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            streaming: true,
            ..Self::assistant(id, String::new(), at)
        }
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStatus {
    /// No identity present
    #[default]
    NoSession,

    /// Identity present, summary and session creation in flight
    Initializing,

    /// Idle, accepts input
    Ready,

    /// A user turn is streaming its response into `placeholder_id`
    Sending { placeholder_id: String },

    /// Initialization ended without a session; input is ignored
    Unavailable { reason: String },
}

impl ChatStatus {
    /// Whether a submission would be accepted
    pub fn is_ready(&self) -> bool {
        matches!(self, ChatStatus::Ready)
    }

    /// Whether the session handle is expected to exist
    #[cfg(test)]
    pub fn has_session(&self) -> bool {
        matches!(self, ChatStatus::Ready | ChatStatus::Sending { .. })
    }
}

/// Per-identity chat context: everything the UI observes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatState {
    pub identity: Option<Identity>,
    /// Bumped at the start of every identity lifetime; tags async work
    pub generation: u64,
    pub summary: Option<FinancialSummary>,
    pub status: ChatStatus,
    pub messages: Vec<Message>,
}

impl ChatState {
    /// Number of messages still marked as streaming
    #[cfg(test)]
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.streaming).count()
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.id.as_str())
    }
}
