//! Chat runtime executor

use super::traits::{ChatSession, CompletionProvider, RecordStore};
use crate::state_machine::{transition, ChatState, ChatUpdate, Effect, Event, TransitionError};
use crate::summary::{build_summary, FinancialSummary};
use crate::system_prompt::seed_instruction;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// A primed provider session handed back by the open task
pub(crate) struct OpenedSession {
    generation: u64,
    summary: FinancialSummary,
    session: Arc<dyn ChatSession>,
}

/// Owns one identity's chat state and executes the effects of its transitions.
///
/// Events are processed one at a time in arrival order. Provider work runs in
/// spawned tasks that report back through the event channel, tagged with the
/// generation they were started for.
pub struct ChatRuntime<S, P>
where
    S: RecordStore + 'static,
    P: CompletionProvider + 'static,
{
    state: ChatState,
    store: Arc<S>,
    provider: Arc<P>,
    /// Live provider session; only present while Ready or Sending
    session: Option<Arc<dyn ChatSession>>,
    /// Stops the in-flight stream task
    stream_cancel: Option<CancellationToken>,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::WeakSender<Event>,
    opened_rx: mpsc::Receiver<OpenedSession>,
    opened_tx: mpsc::Sender<OpenedSession>,
    broadcast_tx: broadcast::Sender<ChatUpdate>,
    snapshot_tx: watch::Sender<ChatState>,
}

impl<S, P> ChatRuntime<S, P>
where
    S: RecordStore + 'static,
    P: CompletionProvider + 'static,
{
    pub fn new(
        store: Arc<S>,
        provider: Arc<P>,
        event_rx: mpsc::Receiver<Event>,
        event_tx: &mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<ChatUpdate>,
        snapshot_tx: watch::Sender<ChatState>,
    ) -> Self {
        let (opened_tx, opened_rx) = mpsc::channel(4);
        Self {
            state: ChatState::default(),
            store,
            provider,
            session: None,
            stream_cancel: None,
            event_rx,
            event_tx: event_tx.downgrade(),
            opened_rx,
            opened_tx,
            broadcast_tx,
            snapshot_tx,
        }
    }

    /// Run until every strong event sender is gone
    pub async fn run(mut self) {
        tracing::info!("Starting chat runtime");

        loop {
            tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(event) => self.process_event(event),
                    None => break,
                },
                Some(opened) = self.opened_rx.recv() => self.install_session(opened),
            }
        }

        self.stop_stream();
        tracing::info!(owner_id = ?self.state.owner_id(), "Chat runtime stopped");
    }

    fn process_event(&mut self, event: Event) {
        let kind = event.kind();
        if let Event::StreamFailed { message, .. } = &event {
            tracing::warn!(error = %message, generation = self.state.generation, "Assistant reply failed");
        }
        match self.apply(event) {
            Ok(()) => {}
            Err(TransitionError::StaleEvent(what)) => {
                tracing::debug!(event = what, generation = self.state.generation, "Dropped stale event");
            }
            Err(e) => {
                tracing::debug!(event = kind, error = %e, "Event rejected");
            }
        }
    }

    fn apply(&mut self, event: Event) -> Result<(), TransitionError> {
        let result = transition(&self.state, event)?;
        self.state = result.new_state;
        for effect in result.effects {
            self.execute_effect(effect);
        }
        self.snapshot_tx.send_replace(self.state.clone());
        Ok(())
    }

    fn install_session(&mut self, opened: OpenedSession) {
        // Install first so it is in place by the time the state says Ready
        let previous = self.session.replace(opened.session);
        let event = Event::SessionOpened {
            generation: opened.generation,
            summary: opened.summary,
            welcome_id: uuid::Uuid::new_v4().to_string(),
            at: Utc::now(),
        };
        if let Err(e) = self.apply(event) {
            tracing::debug!(error = %e, generation = opened.generation, "Discarding session from old lifetime");
            self.session = previous;
        }
    }

    fn stop_stream(&mut self) {
        if let Some(token) = self.stream_cancel.take() {
            token.cancel();
        }
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Notify(update) => {
                // No receivers is fine
                let _ = self.broadcast_tx.send(update);
            }

            Effect::DropSession => {
                self.stop_stream();
                if self.session.take().is_some() {
                    tracing::info!("Dropped chat session");
                }
            }

            Effect::OpenSession {
                generation,
                owner_id,
            } => {
                let store = self.store.clone();
                let provider = self.provider.clone();
                let opened_tx = self.opened_tx.clone();
                let event_tx = self.event_tx.clone();

                tokio::spawn(async move {
                    let summary = build_summary(store.as_ref(), &owner_id).await;
                    let seed = seed_instruction(&summary);

                    match provider.create_session(&seed).await {
                        Ok(session) => {
                            tracing::info!(owner_id = %owner_id, generation, "Chat session opened");
                            let _ = opened_tx
                                .send(OpenedSession {
                                    generation,
                                    summary,
                                    session,
                                })
                                .await;
                        }
                        Err(e) => {
                            tracing::error!(owner_id = %owner_id, generation, error = %e, "Chat session could not be opened");
                            if let Some(tx) = event_tx.upgrade() {
                                let _ = tx
                                    .send(Event::SessionFailed {
                                        generation,
                                        message: e.message,
                                    })
                                    .await;
                            }
                        }
                    }
                });
            }

            Effect::RequestStream {
                generation,
                placeholder_id,
                text,
            } => {
                let cancel = CancellationToken::new();
                self.stop_stream();
                self.stream_cancel = Some(cancel.clone());

                let session = self.session.clone();
                let event_tx = self.event_tx.clone();

                tokio::spawn(async move {
                    let emit = |event: Event| {
                        let event_tx = event_tx.clone();
                        async move {
                            match event_tx.upgrade() {
                                Some(tx) => tx.send(event).await.is_ok(),
                                None => false,
                            }
                        }
                    };
                    let failed = |message: String| Event::StreamFailed {
                        generation,
                        placeholder_id: placeholder_id.clone(),
                        error_message_id: uuid::Uuid::new_v4().to_string(),
                        message,
                        at: Utc::now(),
                    };

                    let Some(session) = session else {
                        emit(failed("No active session".to_string())).await;
                        return;
                    };

                    let opened = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        result = session.send_streaming(&text) => result,
                    };
                    let mut stream = match opened {
                        Ok(stream) => stream,
                        Err(e) => {
                            emit(failed(e.message)).await;
                            return;
                        }
                    };

                    loop {
                        let item = tokio::select! {
                            biased;
                            () = cancel.cancelled() => {
                                tracing::debug!(placeholder_id = %placeholder_id, "Stream cancelled");
                                return;
                            }
                            item = stream.next() => item,
                        };
                        let event = match item {
                            Some(Ok(chunk)) => Event::StreamChunk {
                                generation,
                                placeholder_id: placeholder_id.clone(),
                                text: chunk,
                            },
                            Some(Err(e)) => {
                                emit(failed(e.message)).await;
                                return;
                            }
                            None => {
                                emit(Event::StreamComplete {
                                    generation,
                                    placeholder_id: placeholder_id.clone(),
                                })
                                .await;
                                return;
                            }
                        };
                        if !emit(event).await {
                            return;
                        }
                    }
                });
            }
        }
    }
}
