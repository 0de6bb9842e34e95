//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::*;
use super::transition::*;
use super::*;
use crate::summary::FinancialSummary;
use chrono::Utc;
use proptest::prelude::*;
use std::collections::HashSet;

// ============================================================================
// Test Helpers
// ============================================================================

fn identity(n: u8) -> Identity {
    Identity::new(format!("user-{n}"), format!("user-{n}@example.com"))
}

fn ready_for(n: u8) -> ChatState {
    let s = transition(&ChatState::default(), Event::IdentityPresent { identity: identity(n) })
        .unwrap()
        .new_state;
    transition(
        &s,
        Event::SessionOpened {
            generation: s.generation,
            summary: FinancialSummary::new(150.0, 30.0),
            welcome_id: format!("welcome-{}", s.generation),
            at: Utc::now(),
        },
    )
    .unwrap()
    .new_state
}

fn placeholder_of(state: &ChatState) -> Option<String> {
    match &state.status {
        ChatStatus::Sending { placeholder_id } => Some(placeholder_id.clone()),
        _ => None,
    }
}

/// Abstract driver actions, resolved against the current state so that
/// generated sequences mostly hit live transitions
#[derive(Debug, Clone)]
enum Op {
    Present(u8),
    Absent,
    Open,
    FailOpen,
    Submit(String),
    Chunk(String),
    Complete,
    FailStream,
    StaleChunk(String),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3).prop_map(Op::Present),
        Just(Op::Absent),
        Just(Op::Open),
        Just(Op::FailOpen),
        "[a-zA-Z ]{0,12}".prop_map(Op::Submit),
        "[a-zA-Z ]{1,8}".prop_map(Op::Chunk),
        Just(Op::Complete),
        Just(Op::FailStream),
        "[a-z]{1,8}".prop_map(Op::StaleChunk),
    ]
}

fn resolve(op: Op, state: &ChatState, seq: usize) -> Event {
    let generation = state.generation;
    let placeholder_id = placeholder_of(state).unwrap_or_else(|| "none".to_string());
    match op {
        Op::Present(n) => Event::IdentityPresent {
            identity: identity(n),
        },
        Op::Absent => Event::IdentityAbsent,
        Op::Open => Event::SessionOpened {
            generation,
            summary: FinancialSummary::new(10.0, 5.0),
            welcome_id: format!("welcome-{seq}"),
            at: Utc::now(),
        },
        Op::FailOpen => Event::SessionFailed {
            generation,
            message: "unavailable".into(),
        },
        Op::Submit(text) => Event::UserMessage {
            text,
            message_id: format!("user-{seq}"),
            placeholder_id: format!("placeholder-{seq}"),
            at: Utc::now(),
        },
        Op::Chunk(text) => Event::StreamChunk {
            generation,
            placeholder_id,
            text,
        },
        Op::Complete => Event::StreamComplete {
            generation,
            placeholder_id,
        },
        Op::FailStream => Event::StreamFailed {
            generation,
            placeholder_id,
            error_message_id: format!("error-{seq}"),
            message: "network".into(),
            at: Utc::now(),
        },
        Op::StaleChunk(text) => Event::StreamChunk {
            generation: generation.wrapping_sub(1),
            placeholder_id,
            text,
        },
    }
}

fn is_valid_state(state: &ChatState) -> bool {
    let streaming = state.streaming_count();
    let ids: HashSet<_> = state.messages.iter().map(|m| m.id.as_str()).collect();

    let status_ok = match &state.status {
        ChatStatus::NoSession => state.identity.is_none() && state.messages.is_empty(),
        ChatStatus::Initializing => state.identity.is_some() && state.messages.is_empty(),
        ChatStatus::Ready => state.identity.is_some() && streaming == 0,
        ChatStatus::Sending { placeholder_id } => {
            streaming == 1
                && state
                    .messages
                    .last()
                    .is_some_and(|m| &m.id == placeholder_id && m.streaming)
        }
        ChatStatus::Unavailable { .. } => state.identity.is_some() && state.messages.is_empty(),
    };

    streaming <= 1
        && (state.status.has_session() || streaming == 0)
        && ids.len() == state.messages.len()
        && status_ok
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Any sequence of events leaves the state valid; rejected events change nothing
    #[test]
    fn prop_transitions_preserve_validity(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut state = ChatState::default();
        for (seq, op) in ops.into_iter().enumerate() {
            let event = resolve(op, &state, seq);
            match transition(&state, event) {
                Ok(result) => {
                    prop_assert!(is_valid_state(&result.new_state), "Invalid state: {:?}", result.new_state);
                    prop_assert!(result.new_state.generation >= state.generation);
                    state = result.new_state;
                }
                Err(_) => {
                    prop_assert!(is_valid_state(&state));
                }
            }
        }
    }

    /// Final text is the in-order concatenation of chunks, with exactly one
    /// streaming message while chunks arrive
    #[test]
    fn prop_chunks_concatenate(chunks in proptest::collection::vec("[a-zA-Z0-9 .,]{0,10}", 0..20)) {
        let mut state = transition(&ready_for(0), Event::UserMessage {
            text: "hello".into(),
            message_id: "u".into(),
            placeholder_id: "p".into(),
            at: Utc::now(),
        }).unwrap().new_state;
        let len = state.messages.len();

        for chunk in &chunks {
            state = transition(&state, Event::StreamChunk {
                generation: state.generation,
                placeholder_id: "p".into(),
                text: chunk.clone(),
            }).unwrap().new_state;
            prop_assert_eq!(state.streaming_count(), 1);
            prop_assert_eq!(state.messages.len(), len);
        }

        state = transition(&state, Event::StreamComplete {
            generation: state.generation,
            placeholder_id: "p".into(),
        }).unwrap().new_state;

        let last = state.messages.last().unwrap();
        prop_assert_eq!(&last.text, &chunks.concat());
        prop_assert!(!last.streaming);
        prop_assert_eq!(&state.status, &ChatStatus::Ready);
    }

    /// A submission while sending never adds a placeholder or requests a stream
    #[test]
    fn prop_busy_rejects_messages(first in "[a-z]{1,10}", second in "[a-z]{1,10}") {
        let sending = transition(&ready_for(0), Event::user_message(first)).unwrap().new_state;
        let result = transition(&sending, Event::user_message(second));
        prop_assert_eq!(result.unwrap_err(), TransitionError::Busy);
    }

    /// Stream failure adds exactly one message relative to the pre-send
    /// transcript and returns to Ready
    #[test]
    fn prop_failure_adds_one_message(chunks in proptest::collection::vec("[a-z]{1,5}", 0..5)) {
        let ready = ready_for(0);
        let before = ready.messages.len();
        let mut state = transition(&ready, Event::UserMessage {
            text: "q".into(),
            message_id: "u".into(),
            placeholder_id: "p".into(),
            at: Utc::now(),
        }).unwrap().new_state;
        let after_send = state.messages.len();

        for chunk in chunks {
            state = transition(&state, Event::StreamChunk {
                generation: state.generation,
                placeholder_id: "p".into(),
                text: chunk,
            }).unwrap().new_state;
        }
        state = transition(&state, Event::StreamFailed {
            generation: state.generation,
            placeholder_id: "p".into(),
            error_message_id: "e".into(),
            message: "boom".into(),
            at: Utc::now(),
        }).unwrap().new_state;

        prop_assert_eq!(after_send, before + 2);
        prop_assert_eq!(state.messages.len(), after_send + 1);
        prop_assert_eq!(&state.status, &ChatStatus::Ready);
        prop_assert_eq!(state.streaming_count(), 0);
    }

    /// Re-presenting the live identity preserves the transcript verbatim
    #[test]
    fn prop_same_identity_preserves_transcript(n in 0u8..5, sending in any::<bool>()) {
        let mut state = ready_for(n);
        if sending {
            state = transition(&state, Event::user_message("hi")).unwrap().new_state;
        }
        let result = transition(&state, Event::IdentityPresent { identity: identity(n) }).unwrap();
        prop_assert_eq!(&result.new_state, &state);
        prop_assert!(result.effects.is_empty());
    }

    /// Switching identities clears the old transcript before the new session opens
    #[test]
    fn prop_identity_switch_clears(a in 0u8..5, b in 5u8..10) {
        let state = ready_for(a);
        let result = transition(&state, Event::IdentityPresent { identity: identity(b) }).unwrap();

        prop_assert!(result.new_state.messages.is_empty());
        prop_assert_eq!(&result.new_state.status, &ChatStatus::Initializing);
        let cleared_at = result.effects.iter().position(|e| *e == Effect::cleared());
        let open_at = result.effects.iter().position(|e| matches!(e, Effect::OpenSession { .. }));
        prop_assert!(cleared_at.is_some() && open_at.is_some() && cleared_at < open_at);

        // Events from the previous lifetime are refused
        let stale = transition(&result.new_state, Event::SessionOpened {
            generation: state.generation,
            summary: FinancialSummary::default(),
            welcome_id: "late".into(),
            at: Utc::now(),
        });
        prop_assert!(stale.is_err());
    }
}
