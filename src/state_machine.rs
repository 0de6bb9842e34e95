//! Chat session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transcript;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{ChatUpdate, Effect};
pub use event::Event;
pub use state::{ChatState, ChatStatus, Identity, Message};
pub use transition::{transition, TransitionError};
