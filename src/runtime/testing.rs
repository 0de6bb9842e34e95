//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::ChatRuntime;
use crate::db::{Collection, NewRecord, Record};
use crate::llm::{LlmError, TextStream};
use crate::state_machine::{ChatState, ChatUpdate, Event, Identity};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

// ============================================================================
// In-memory Record Store
// ============================================================================

/// Record store backed by a map, with switchable failures
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<Collection, Vec<Record>>>,
    failing_reads: Mutex<HashSet<Collection>>,
    failing_writes: AtomicBool,
    next_id: AtomicUsize,
}

#[allow(dead_code)]
impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one record per amount for `owner_id`
    pub fn seed(&self, collection: Collection, owner_id: &str, amounts: &[f64]) {
        let mut records = self.records.lock().unwrap();
        let list = records.entry(collection).or_default();
        for amount in amounts {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            list.push(Record {
                id: format!("seed-{id}"),
                owner_id: owner_id.to_string(),
                description: "seeded".to_string(),
                amount: Some(*amount),
                category: "General".to_string(),
                date: "2024-01-01".to_string(),
            });
        }
    }

    /// Make every query of `collection` fail
    pub fn fail_collection(&self, collection: Collection) {
        self.failing_reads.lock().unwrap().insert(collection);
    }

    /// Make inserts and deletes fail
    pub fn fail_writes(&self, fail: bool) {
        self.failing_writes.store(fail, Ordering::SeqCst);
    }

    pub fn all(&self, collection: Collection) -> Vec<Record> {
        self.records
            .lock()
            .unwrap()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn list_records(&self, collection: Collection, owner_id: &str) -> Result<Vec<Record>, String> {
        if self.failing_reads.lock().unwrap().contains(&collection) {
            return Err(format!("{collection} unavailable"));
        }
        Ok(self
            .all(collection)
            .into_iter()
            .filter(|r| r.owner_id == owner_id)
            .collect())
    }

    async fn insert_record(
        &self,
        collection: Collection,
        owner_id: &str,
        record: &NewRecord,
    ) -> Result<Record, String> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err("write rejected".to_string());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = record.clone().into_record(format!("stored-{id}"), owner_id);
        self.records
            .lock()
            .unwrap()
            .entry(collection)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn delete_record(&self, collection: Collection, owner_id: &str, id: &str) -> Result<(), String> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err("write rejected".to_string());
        }
        let mut records = self.records.lock().unwrap();
        let list = records.entry(collection).or_default();
        let before = list.len();
        list.retain(|r| !(r.id == id && r.owner_id == owner_id));
        if list.len() == before {
            return Err(format!("Record not found: {id}"));
        }
        Ok(())
    }
}

// ============================================================================
// Mock Completion Provider
// ============================================================================

type Turn = mpsc::UnboundedReceiver<Result<String, LlmError>>;

/// Provider whose streamed replies are driven by the test
#[derive(Default)]
pub struct MockProvider {
    turns: Arc<Mutex<VecDeque<Turn>>>,
    /// Texts sent through any session, in order
    pub sends: Arc<Mutex<Vec<String>>>,
    /// Seed instructions of every session created
    pub seeds: Mutex<Vec<String>>,
    completions: Mutex<VecDeque<Result<String, LlmError>>>,
    /// One-shot prompts received
    pub prompts: Mutex<Vec<String>>,
    fail_sessions: AtomicBool,
    open_delay: Mutex<Duration>,
    complete_delay: Mutex<Duration>,
}

#[allow(dead_code)]
impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next streamed reply; chunks are pushed through the
    /// returned sender and the stream ends when it is dropped
    pub fn script_turn(&self) -> mpsc::UnboundedSender<Result<String, LlmError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.turns.lock().unwrap().push_back(rx);
        tx
    }

    /// Queue a one-shot completion result
    pub fn queue_completion(&self, result: Result<String, LlmError>) {
        self.completions.lock().unwrap().push_back(result);
    }

    pub fn fail_sessions(&self, fail: bool) {
        self.fail_sessions.store(fail, Ordering::SeqCst);
    }

    /// Delay session creation to widen race windows
    pub fn delay_sessions(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    /// Hold one-shot completions open for `delay`
    pub fn delay_completions(&self, delay: Duration) {
        *self.complete_delay.lock().unwrap() = delay;
    }

    pub fn sessions_created(&self) -> usize {
        self.seeds.lock().unwrap().len()
    }

    pub fn recorded_sends(&self) -> Vec<String> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn create_session(&self, seed: &str) -> Result<Arc<dyn ChatSession>, LlmError> {
        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(LlmError::unavailable("provider down"));
        }
        self.seeds.lock().unwrap().push(seed.to_string());
        Ok(Arc::new(ScriptedSession {
            turns: self.turns.clone(),
            sends: self.sends.clone(),
        }))
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let delay = *self.complete_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock completion queued")))
    }
}

/// Session that replays scripted turns
pub struct ScriptedSession {
    turns: Arc<Mutex<VecDeque<Turn>>>,
    sends: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ChatSession for ScriptedSession {
    async fn send_streaming(&self, text: &str) -> Result<TextStream, LlmError> {
        self.sends.lock().unwrap().push(text.to_string());
        let turn = self.turns.lock().unwrap().pop_front();
        match turn {
            Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Err(LlmError::network("No scripted turn")),
        }
    }
}

// ============================================================================
// Test Runtime
// ============================================================================

/// A `ChatRuntime` driven directly through its event channel
pub struct TestChat {
    pub event_tx: mpsc::Sender<Event>,
    pub updates: broadcast::Receiver<ChatUpdate>,
    pub snapshot: watch::Receiver<ChatState>,
}

#[allow(dead_code)]
impl TestChat {
    pub fn start(store: Arc<InMemoryRecordStore>, provider: Arc<MockProvider>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, updates) = broadcast::channel(256);
        let (snapshot_tx, snapshot) = watch::channel(ChatState::default());
        let runtime = ChatRuntime::new(store, provider, event_rx, &event_tx, broadcast_tx, snapshot_tx);
        tokio::spawn(runtime.run());
        Self {
            event_tx,
            updates,
            snapshot,
        }
    }

    pub async fn send(&self, event: Event) {
        self.event_tx.send(event).await.unwrap();
    }

    pub async fn present(&self, identity: &Identity) {
        self.send(Event::IdentityPresent {
            identity: identity.clone(),
        })
        .await;
    }

    /// Wait until the published state satisfies `pred`
    pub async fn wait_until(&mut self, pred: impl FnMut(&ChatState) -> bool) -> ChatState {
        tokio::time::timeout(Duration::from_secs(2), self.snapshot.wait_for(pred))
            .await
            .expect("timed out waiting for chat state")
            .expect("runtime stopped")
            .clone()
    }

    pub fn state(&self) -> ChatState {
        self.snapshot.borrow().clone()
    }

    /// Drain updates received so far
    pub fn drain_updates(&mut self) -> Vec<ChatUpdate> {
        let mut out = vec![];
        while let Ok(update) = self.updates.try_recv() {
            out.push(update);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ChatHub, SubmitOutcome};
    use crate::state_machine::state::Role;
    use crate::state_machine::ChatStatus;
    use crate::system_prompt::CONNECTION_ERROR;

    fn alice() -> Identity {
        Identity::new("alice", "alice@example.com")
    }

    fn bob() -> Identity {
        Identity::new("bob", "bob@example.com")
    }

    fn seeded_store() -> Arc<InMemoryRecordStore> {
        let store = InMemoryRecordStore::new();
        store.seed(Collection::Savings, "alice", &[100.0, 50.0]);
        store.seed(Collection::Expenses, "alice", &[30.0]);
        store.seed(Collection::Savings, "bob", &[10.0]);
        Arc::new(store)
    }

    async fn ready_chat(provider: Arc<MockProvider>) -> TestChat {
        let mut chat = TestChat::start(seeded_store(), provider);
        chat.present(&alice()).await;
        chat.wait_until(|s| s.status == ChatStatus::Ready).await;
        chat
    }

    #[tokio::test]
    async fn test_session_opens_with_welcome() {
        let provider = Arc::new(MockProvider::new());
        let chat = ready_chat(provider.clone()).await;

        let state = chat.state();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Role::Assistant);
        assert!(state.messages[0].text.contains("Net Balance: $120.00"));

        let seeds = provider.seeds.lock().unwrap().clone();
        assert_eq!(seeds.len(), 1);
        assert!(seeds[0].contains("- Income: $150.00"));
    }

    #[tokio::test]
    async fn test_re_present_preserves_transcript() {
        let provider = Arc::new(MockProvider::new());
        let mut chat = ready_chat(provider.clone()).await;
        let before = chat.state();

        chat.present(&alice()).await;
        // A user message acts as a barrier: once it lands, the re-present was processed
        let turn = provider.script_turn();
        chat.send(Event::user_message("hi")).await;
        let state = chat.wait_until(|s| matches!(s.status, ChatStatus::Sending { .. })).await;
        drop(turn);

        assert_eq!(state.messages[0], before.messages[0]);
        assert_eq!(state.messages.len(), 3);
        assert_eq!(provider.sessions_created(), 1);
    }

    #[tokio::test]
    async fn test_stream_chunks_applied_in_order() {
        let provider = Arc::new(MockProvider::new());
        let mut chat = ready_chat(provider.clone()).await;

        let turn = provider.script_turn();
        chat.send(Event::user_message("How am I doing?")).await;

        turn.send(Ok("You are ".into())).unwrap();
        let mid = chat
            .wait_until(|s| s.messages.last().is_some_and(|m| m.text == "You are "))
            .await;
        assert_eq!(mid.streaming_count(), 1);
        assert_eq!(mid.messages.len(), 3);

        turn.send(Ok("doing ".into())).unwrap();
        turn.send(Ok("well.".into())).unwrap();
        drop(turn);

        let done = chat.wait_until(|s| s.status == ChatStatus::Ready && s.messages.len() == 3).await;
        let reply = done.messages.last().unwrap();
        assert_eq!(reply.text, "You are doing well.");
        assert!(!reply.streaming);
        assert_eq!(provider.recorded_sends(), vec!["How am I doing?"]);
    }

    #[tokio::test]
    async fn test_concurrent_submit_rejected() {
        let provider = Arc::new(MockProvider::new());
        let mut chat = ready_chat(provider.clone()).await;

        let turn = provider.script_turn();
        chat.send(Event::user_message("first")).await;
        chat.send(Event::user_message("second")).await;
        turn.send(Ok("answer".into())).unwrap();
        drop(turn);

        let done = chat
            .wait_until(|s| s.status == ChatStatus::Ready && s.messages.len() > 1)
            .await;
        assert_eq!(done.messages.len(), 3);
        assert_eq!(done.messages[1].text, "first");
        assert_eq!(provider.recorded_sends(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_stream_failure_appends_single_error() {
        let provider = Arc::new(MockProvider::new());
        let mut chat = ready_chat(provider.clone()).await;

        let turn = provider.script_turn();
        chat.send(Event::user_message("hi")).await;
        turn.send(Ok("Part".into())).unwrap();
        chat.wait_until(|s| s.messages.last().is_some_and(|m| m.text == "Part"))
            .await;
        turn.send(Err(LlmError::network("connection reset"))).unwrap();

        let done = chat
            .wait_until(|s| s.status == ChatStatus::Ready && s.messages.len() > 3)
            .await;
        assert_eq!(done.messages.len(), 4);
        assert_eq!(done.messages[2].text, "Part");
        assert!(!done.messages[2].streaming);
        assert_eq!(done.messages[3].text, CONNECTION_ERROR);
        assert_eq!(done.streaming_count(), 0);
    }

    #[tokio::test]
    async fn test_send_without_scripted_reply_fails_gracefully() {
        let provider = Arc::new(MockProvider::new());
        let mut chat = ready_chat(provider).await;

        chat.send(Event::user_message("hi")).await;
        let done = chat
            .wait_until(|s| s.status == ChatStatus::Ready && s.messages.len() > 1)
            .await;
        assert_eq!(done.messages.last().unwrap().text, CONNECTION_ERROR);

        // Still usable afterwards
        assert!(done.status.is_ready());
    }

    #[tokio::test]
    async fn test_identity_switch_clears_before_new_welcome() {
        let provider = Arc::new(MockProvider::new());
        let mut chat = ready_chat(provider.clone()).await;
        chat.drain_updates();

        chat.present(&bob()).await;
        let state = chat
            .wait_until(|s| s.owner_id() == Some("bob") && s.status == ChatStatus::Ready)
            .await;
        assert_eq!(state.messages.len(), 1);
        assert!(state.messages[0].text.contains("Net Balance: $10.00"));

        let updates = chat.drain_updates();
        let cleared = updates
            .iter()
            .position(|u| *u == ChatUpdate::TranscriptCleared)
            .expect("transcript cleared");
        let welcome = updates
            .iter()
            .position(|u| matches!(u, ChatUpdate::MessageAppended { .. }))
            .expect("welcome appended");
        assert!(cleared < welcome);
    }

    #[tokio::test]
    async fn test_stale_stream_never_reaches_new_identity() {
        let provider = Arc::new(MockProvider::new());
        let mut chat = ready_chat(provider.clone()).await;

        let turn = provider.script_turn();
        chat.send(Event::user_message("alice asks")).await;
        chat.wait_until(|s| matches!(s.status, ChatStatus::Sending { .. }))
            .await;

        chat.present(&bob()).await;
        chat.wait_until(|s| s.owner_id() == Some("bob") && s.status == ChatStatus::Ready)
            .await;

        // The old stream was cancelled; anything it still produces is ignored
        let _ = turn.send(Ok("secret for alice".into()));
        drop(turn);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = chat.state();
        assert_eq!(state.messages.len(), 1);
        assert!(state.messages.iter().all(|m| !m.text.contains("alice")));
    }

    #[tokio::test]
    async fn test_slow_open_from_old_identity_is_discarded() {
        let provider = Arc::new(MockProvider::new());
        provider.delay_sessions(Duration::from_millis(30));
        let mut chat = TestChat::start(seeded_store(), provider.clone());

        chat.present(&alice()).await;
        chat.present(&bob()).await;
        chat.wait_until(|s| s.status == ChatStatus::Ready).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let state = chat.state();
        assert_eq!(state.owner_id(), Some("bob"));
        assert_eq!(state.messages.len(), 1);
        assert!(state.messages[0].text.contains("$10.00"));
    }

    #[tokio::test]
    async fn test_session_failure_leaves_chat_unavailable() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_sessions(true);
        let mut chat = TestChat::start(seeded_store(), provider.clone());

        chat.present(&alice()).await;
        let state = chat
            .wait_until(|s| matches!(s.status, ChatStatus::Unavailable { .. }))
            .await;
        assert!(state.messages.is_empty());

        // Re-presenting retries once the provider recovers
        provider.fail_sessions(false);
        chat.present(&alice()).await;
        chat.wait_until(|s| s.status == ChatStatus::Ready).await;
        assert_eq!(provider.sessions_created(), 1);
    }

    #[tokio::test]
    async fn test_summary_failure_still_opens_session() {
        let store = seeded_store();
        store.fail_collection(Collection::Expenses);
        let mut chat = TestChat::start(store, Arc::new(MockProvider::new()));

        chat.present(&alice()).await;
        let state = chat.wait_until(|s| s.status == ChatStatus::Ready).await;
        assert!(state.messages[0].text.contains("$150.00"));
    }

    // ========================================================================
    // Hub
    // ========================================================================

    fn hub(provider: Arc<MockProvider>) -> ChatHub<InMemoryRecordStore, MockProvider> {
        ChatHub::new(seeded_store(), provider)
    }

    async fn wait_ready(handle: &mut crate::runtime::ChatHandle) {
        tokio::time::timeout(
            Duration::from_secs(2),
            handle.snapshot_rx.wait_for(|s| s.status.is_ready()),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_hub_submit_checks_readiness() {
        let provider = Arc::new(MockProvider::new());
        let hub = hub(provider.clone());

        assert_eq!(hub.submit("alice", "hi").await, SubmitOutcome::NotReady);

        let mut handle = hub.present(alice()).await;
        wait_ready(&mut handle).await;
        assert_eq!(hub.submit("alice", "  ").await, SubmitOutcome::Empty);

        let turn = provider.script_turn();
        assert_eq!(hub.submit("alice", "first").await, SubmitOutcome::Accepted);
        handle
            .snapshot_rx
            .wait_for(|s| matches!(s.status, ChatStatus::Sending { .. }))
            .await
            .unwrap();
        assert_eq!(hub.submit("alice", "second").await, SubmitOutcome::NotReady);
        drop(turn);

        wait_ready(&mut handle).await;
        assert_eq!(provider.recorded_sends(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_hub_present_reuses_runtime() {
        let provider = Arc::new(MockProvider::new());
        let hub = hub(provider.clone());

        let mut handle = hub.present(alice()).await;
        wait_ready(&mut handle).await;
        let again = hub.present(alice()).await;
        assert!(handle.event_tx.same_channel(&again.event_tx));

        let (state, _rx) = hub.subscribe("alice").await.unwrap();
        assert_eq!(state.messages.len(), 1);
        assert!(hub.snapshot("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_hub_absent_tears_down() {
        let provider = Arc::new(MockProvider::new());
        let hub = hub(provider.clone());

        let mut handle = hub.present(alice()).await;
        wait_ready(&mut handle).await;
        hub.absent("alice").await;

        let state = tokio::time::timeout(
            Duration::from_secs(2),
            handle.snapshot_rx.wait_for(|s| s.status == ChatStatus::NoSession),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!(state.messages.is_empty());
        assert!(state.identity.is_none());
        assert!(hub.snapshot("alice").await.is_none());

        // Signing back in starts fresh
        let mut handle = hub.present(alice()).await;
        wait_ready(&mut handle).await;
        assert_eq!(provider.sessions_created(), 2);
    }
}
