//! Pure state transition function
//!
//! Given the same state and event this always produces the same new state and
//! effects. All I/O happens in the runtime that executes the effects.

use super::state::Identity;
use super::transcript::{apply_chunk, find, finalize};
use super::{ChatState, ChatStatus, Effect, Event, Message};
use crate::system_prompt::{welcome_message, CONNECTION_ERROR};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Reasons an event is refused; none of them change state
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("No active session")]
    NotReady,
    #[error("A response is still streaming")]
    Busy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Stale event: {0}")]
    StaleEvent(&'static str),
}

/// Pure transition function
pub fn transition(state: &ChatState, event: Event) -> Result<TransitionResult, TransitionError> {
    match event {
        // ============================================================
        // Identity lifecycle
        // ============================================================
        Event::IdentityPresent { identity } => {
            let same_identity = state.identity.as_ref() == Some(&identity);
            let live = matches!(
                state.status,
                ChatStatus::Initializing | ChatStatus::Ready | ChatStatus::Sending { .. }
            );
            if same_identity && live {
                // Navigation re-presents the identity; keep everything
                return Ok(TransitionResult::new(state.clone()));
            }
            Ok(begin_session(state, identity))
        }

        Event::IdentityAbsent => {
            if state.identity.is_none() && state.status == ChatStatus::NoSession {
                return Ok(TransitionResult::new(state.clone()));
            }
            let new_state = ChatState {
                identity: None,
                generation: state.generation + 1,
                summary: None,
                status: ChatStatus::NoSession,
                messages: vec![],
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::DropSession)
                .with_effects(clear_notice(state))
                .with_effect(Effect::status(ChatStatus::NoSession)))
        }

        // ============================================================
        // Session creation
        // ============================================================
        Event::SessionOpened {
            generation,
            summary,
            welcome_id,
            at,
        } => {
            if generation != state.generation || state.status != ChatStatus::Initializing {
                return Err(TransitionError::StaleEvent("session_opened"));
            }
            let welcome = Message::assistant(welcome_id, welcome_message(&summary), at);
            let mut new_state = state.clone();
            new_state.summary = Some(summary);
            new_state.messages.push(welcome.clone());
            new_state.status = ChatStatus::Ready;

            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::appended(welcome))
                .with_effect(Effect::status(ChatStatus::Ready)))
        }

        Event::SessionFailed {
            generation,
            message,
        } => {
            if generation != state.generation || state.status != ChatStatus::Initializing {
                return Err(TransitionError::StaleEvent("session_failed"));
            }
            let status = ChatStatus::Unavailable { reason: message };
            let mut new_state = state.clone();
            new_state.status = status.clone();
            Ok(TransitionResult::new(new_state).with_effect(Effect::status(status)))
        }

        // ============================================================
        // User submission
        // ============================================================
        Event::UserMessage {
            text,
            message_id,
            placeholder_id,
            at,
        } => match &state.status {
            ChatStatus::Ready => {
                if text.trim().is_empty() {
                    return Err(TransitionError::EmptyMessage);
                }
                let user = Message::user(message_id, text.clone(), at);
                let placeholder = Message::placeholder(placeholder_id.clone(), at);
                let status = ChatStatus::Sending {
                    placeholder_id: placeholder_id.clone(),
                };

                let mut new_state = state.clone();
                new_state.messages.push(user.clone());
                new_state.messages.push(placeholder.clone());
                new_state.status = status.clone();

                Ok(TransitionResult::new(new_state)
                    .with_effect(Effect::appended(user))
                    .with_effect(Effect::appended(placeholder))
                    .with_effect(Effect::status(status))
                    .with_effect(Effect::RequestStream {
                        generation: state.generation,
                        placeholder_id,
                        text,
                    }))
            }
            ChatStatus::Sending { .. } => Err(TransitionError::Busy),
            ChatStatus::NoSession | ChatStatus::Initializing | ChatStatus::Unavailable { .. } => {
                Err(TransitionError::NotReady)
            }
        },

        // ============================================================
        // Streaming
        // ============================================================
        Event::StreamChunk {
            generation,
            placeholder_id,
            text,
        } => {
            ensure_streaming(state, generation, &placeholder_id, "stream_chunk")?;
            let messages = apply_chunk(&state.messages, &placeholder_id, &text);
            let updated = find(&messages, &placeholder_id).cloned();

            let mut new_state = state.clone();
            new_state.messages = messages;
            Ok(TransitionResult::new(new_state).with_effects(updated.map(Effect::updated)))
        }

        Event::StreamComplete {
            generation,
            placeholder_id,
        } => {
            ensure_streaming(state, generation, &placeholder_id, "stream_complete")?;
            let messages = finalize(&state.messages, &placeholder_id);
            let updated = find(&messages, &placeholder_id).cloned();

            let mut new_state = state.clone();
            new_state.messages = messages;
            new_state.status = ChatStatus::Ready;
            Ok(TransitionResult::new(new_state)
                .with_effects(updated.map(Effect::updated))
                .with_effect(Effect::status(ChatStatus::Ready)))
        }

        Event::StreamFailed {
            generation,
            placeholder_id,
            error_message_id,
            message: _,
            at,
        } => {
            ensure_streaming(state, generation, &placeholder_id, "stream_failed")?;
            // The placeholder keeps whatever text arrived but stops streaming
            let mut messages = finalize(&state.messages, &placeholder_id);
            let updated = find(&messages, &placeholder_id).cloned();
            let error = Message::assistant(error_message_id, CONNECTION_ERROR, at);
            messages.push(error.clone());

            let mut new_state = state.clone();
            new_state.messages = messages;
            new_state.status = ChatStatus::Ready;
            Ok(TransitionResult::new(new_state)
                .with_effects(updated.map(Effect::updated))
                .with_effect(Effect::appended(error))
                .with_effect(Effect::status(ChatStatus::Ready)))
        }
    }
}

/// Start a fresh identity lifetime: drop the old session and clear the transcript
fn begin_session(state: &ChatState, identity: Identity) -> TransitionResult {
    let generation = state.generation + 1;
    let owner_id = identity.id.clone();
    let new_state = ChatState {
        identity: Some(identity),
        generation,
        summary: None,
        status: ChatStatus::Initializing,
        messages: vec![],
    };

    let teardown = (state.status != ChatStatus::NoSession).then_some(Effect::DropSession);

    TransitionResult::new(new_state)
        .with_effects(teardown)
        .with_effects(clear_notice(state))
        .with_effect(Effect::status(ChatStatus::Initializing))
        .with_effect(Effect::OpenSession {
            generation,
            owner_id,
        })
}

fn clear_notice(state: &ChatState) -> Option<Effect> {
    (!state.messages.is_empty()).then(Effect::cleared)
}

fn ensure_streaming(
    state: &ChatState,
    generation: u64,
    placeholder_id: &str,
    what: &'static str,
) -> Result<(), TransitionError> {
    match &state.status {
        ChatStatus::Sending { placeholder_id: current }
            if generation == state.generation && current == placeholder_id =>
        {
            Ok(())
        }
        _ => Err(TransitionError::StaleEvent(what)),
    }
}
