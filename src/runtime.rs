//! Runtime for per-identity chat sessions
//!
//! Each signed-in identity gets one `ChatRuntime` task. The hub routes
//! identity and submission events to it and exposes its state to the API.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ChatRuntime;
pub use traits::*;

use crate::state_machine::{ChatState, ChatUpdate, Event, Identity};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, RwLock};

/// Handle to interact with a running chat
#[derive(Clone)]
pub struct ChatHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<ChatUpdate>,
    pub snapshot_rx: watch::Receiver<ChatState>,
}

/// Why a submission was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// No session, or a reply is still streaming
    NotReady,
    Empty,
}

/// Manager for all chat runtimes, keyed by owner id
pub struct ChatHub<S, P>
where
    S: RecordStore + 'static,
    P: CompletionProvider + 'static,
{
    store: Arc<S>,
    provider: Arc<P>,
    chats: RwLock<HashMap<String, ChatHandle>>,
}

impl<S, P> ChatHub<S, P>
where
    S: RecordStore + 'static,
    P: CompletionProvider + 'static,
{
    pub fn new(store: Arc<S>, provider: Arc<P>) -> Self {
        Self {
            store,
            provider,
            chats: RwLock::new(HashMap::new()),
        }
    }

    /// Announce that `identity` is signed in, starting its runtime if needed.
    ///
    /// Re-announcing a live identity is a no-op in the state machine, so
    /// callers may do this on every page load.
    pub async fn present(&self, identity: Identity) -> ChatHandle {
        let handle = self.get_or_create(&identity.id).await;
        if handle
            .event_tx
            .send(Event::IdentityPresent { identity })
            .await
            .is_err()
        {
            tracing::warn!("Chat runtime gone before identity could be presented");
        }
        handle
    }

    /// Announce sign-out: the runtime tears down its session and exits
    pub async fn absent(&self, owner_id: &str) {
        let handle = self.chats.write().await.remove(owner_id);
        if let Some(handle) = handle {
            let _ = handle.event_tx.send(Event::IdentityAbsent).await;
            tracing::info!(owner_id, "Chat runtime released");
        }
    }

    /// Queue a user message if the chat can take one right now
    pub async fn submit(&self, owner_id: &str, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() {
            return SubmitOutcome::Empty;
        }
        let Some(handle) = self.handle(owner_id).await else {
            return SubmitOutcome::NotReady;
        };
        if !handle.snapshot_rx.borrow().status.is_ready() {
            return SubmitOutcome::NotReady;
        }
        match handle.event_tx.send(Event::user_message(text)).await {
            Ok(()) => SubmitOutcome::Accepted,
            Err(_) => SubmitOutcome::NotReady,
        }
    }

    /// Current state of the owner's chat, if one is running
    pub async fn snapshot(&self, owner_id: &str) -> Option<ChatState> {
        let handle = self.handle(owner_id).await?;
        let state = handle.snapshot_rx.borrow().clone();
        Some(state)
    }

    /// Subscribe to updates, returning the state to render first.
    ///
    /// The subscription is taken before the snapshot is read, so an update
    /// may be reflected in both; clients apply updates by message id.
    pub async fn subscribe(&self, owner_id: &str) -> Option<(ChatState, broadcast::Receiver<ChatUpdate>)> {
        let handle = self.handle(owner_id).await?;
        let rx = handle.broadcast_tx.subscribe();
        let state = handle.snapshot_rx.borrow().clone();
        Some((state, rx))
    }

    async fn handle(&self, owner_id: &str) -> Option<ChatHandle> {
        self.chats.read().await.get(owner_id).cloned()
    }

    async fn get_or_create(&self, owner_id: &str) -> ChatHandle {
        if let Some(handle) = self.handle(owner_id).await {
            if !handle.event_tx.is_closed() {
                return handle;
            }
        }

        let mut chats = self.chats.write().await;
        // Double-check after acquiring the write lock
        if let Some(handle) = chats.get(owner_id) {
            if !handle.event_tx.is_closed() {
                return handle.clone();
            }
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(ChatState::default());

        let runtime = ChatRuntime::new(
            self.store.clone(),
            self.provider.clone(),
            event_rx,
            &event_tx,
            broadcast_tx.clone(),
            snapshot_tx,
        );
        tokio::spawn(runtime.run());
        tracing::info!(owner_id, "Started chat runtime");

        let handle = ChatHandle {
            event_tx,
            broadcast_tx,
            snapshot_rx,
        };
        chats.insert(owner_id.to_string(), handle.clone());
        handle
    }
}
