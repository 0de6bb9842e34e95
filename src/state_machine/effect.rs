//! Effects produced by state transitions

use super::state::{ChatStatus, Message};
use serde::Serialize;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Build the financial summary and open a primed provider session
    OpenSession { generation: u64, owner_id: String },

    /// Drop the session handle and stop any in-flight stream
    DropSession,

    /// Stream a completion for `text` into the placeholder
    RequestStream {
        generation: u64,
        placeholder_id: String,
        text: String,
    },

    /// Notify connected clients
    Notify(ChatUpdate),
}

/// Incremental transcript changes pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatUpdate {
    TranscriptCleared,
    MessageAppended { message: Message },
    /// Replaces the message with the same id
    MessageUpdated { message: Message },
    StatusChanged { status: ChatStatus },
}

impl Effect {
    pub fn appended(message: Message) -> Self {
        Effect::Notify(ChatUpdate::MessageAppended { message })
    }

    pub fn updated(message: Message) -> Self {
        Effect::Notify(ChatUpdate::MessageUpdated { message })
    }

    pub fn status(status: ChatStatus) -> Self {
        Effect::Notify(ChatUpdate::StatusChanged { status })
    }

    pub fn cleared() -> Self {
        Effect::Notify(ChatUpdate::TranscriptCleared)
    }
}
