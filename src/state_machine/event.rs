//! Events that drive the chat session

use super::state::Identity;
use crate::summary::FinancialSummary;
use chrono::{DateTime, Utc};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Identity events
    IdentityPresent {
        identity: Identity,
    },
    IdentityAbsent,

    // Session creation
    SessionOpened {
        generation: u64,
        summary: FinancialSummary,
        welcome_id: String,
        at: DateTime<Utc>,
    },
    SessionFailed {
        generation: u64,
        message: String,
    },

    // User events
    UserMessage {
        text: String,
        message_id: String,
        placeholder_id: String,
        at: DateTime<Utc>,
    },

    // Stream events
    StreamChunk {
        generation: u64,
        placeholder_id: String,
        text: String,
    },
    StreamComplete {
        generation: u64,
        placeholder_id: String,
    },
    StreamFailed {
        generation: u64,
        placeholder_id: String,
        error_message_id: String,
        message: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Build a user message event with fresh ids
    pub fn user_message(text: impl Into<String>) -> Self {
        Event::UserMessage {
            text: text.into(),
            message_id: uuid::Uuid::new_v4().to_string(),
            placeholder_id: uuid::Uuid::new_v4().to_string(),
            at: Utc::now(),
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Event::IdentityPresent { .. } => "identity_present",
            Event::IdentityAbsent => "identity_absent",
            Event::SessionOpened { .. } => "session_opened",
            Event::SessionFailed { .. } => "session_failed",
            Event::UserMessage { .. } => "user_message",
            Event::StreamChunk { .. } => "stream_chunk",
            Event::StreamComplete { .. } => "stream_complete",
            Event::StreamFailed { .. } => "stream_failed",
        }
    }
}
