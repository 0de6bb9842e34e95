//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the chat runtime with mock implementations.

use crate::db::{Collection, Database, NewRecord, Record};
use crate::llm::{LlmError, LlmMessage, LlmRequest, LlmService, ModelRegistry, TextStream};
use crate::system_prompt::{seed_turn, SESSION_ACKNOWLEDGEMENT};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex};

/// Owner-scoped record storage
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records of `collection` owned by `owner_id`
    async fn list_records(&self, collection: Collection, owner_id: &str) -> Result<Vec<Record>, String>;

    /// Persist a record, returning it with the store-assigned id
    async fn insert_record(
        &self,
        collection: Collection,
        owner_id: &str,
        record: &NewRecord,
    ) -> Result<Record, String>;

    async fn delete_record(&self, collection: Collection, owner_id: &str, id: &str) -> Result<(), String>;
}

/// Source of conversation sessions and one-shot completions
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a session primed with `seed` and one acknowledgement turn
    async fn create_session(&self, seed: &str) -> Result<Arc<dyn ChatSession>, LlmError>;

    /// Single prompt, single answer
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// A running conversation with the provider
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Stream the reply to `text`. The stream is finite and not restartable.
    async fn send_streaming(&self, text: &str) -> Result<TextStream, LlmError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn list_records(&self, collection: Collection, owner_id: &str) -> Result<Vec<Record>, String> {
        (**self).list_records(collection, owner_id).await
    }

    async fn insert_record(
        &self,
        collection: Collection,
        owner_id: &str,
        record: &NewRecord,
    ) -> Result<Record, String> {
        (**self).insert_record(collection, owner_id, record).await
    }

    async fn delete_record(&self, collection: Collection, owner_id: &str, id: &str) -> Result<(), String> {
        (**self).delete_record(collection, owner_id, id).await
    }
}

#[async_trait]
impl<T: CompletionProvider + ?Sized> CompletionProvider for Arc<T> {
    async fn create_session(&self, seed: &str) -> Result<Arc<dyn ChatSession>, LlmError> {
        (**self).create_session(seed).await
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        (**self).complete(prompt).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as a RecordStore
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for DatabaseStorage {
    async fn list_records(&self, collection: Collection, owner_id: &str) -> Result<Vec<Record>, String> {
        self.db
            .list_records(collection, owner_id)
            .map_err(|e| e.to_string())
    }

    async fn insert_record(
        &self,
        collection: Collection,
        owner_id: &str,
        record: &NewRecord,
    ) -> Result<Record, String> {
        self.db
            .insert_record(collection, owner_id, record)
            .map_err(|e| e.to_string())
    }

    async fn delete_record(&self, collection: Collection, owner_id: &str, id: &str) -> Result<(), String> {
        self.db
            .delete_record(collection, owner_id, id)
            .map_err(|e| e.to_string())
    }
}

/// Adapter to use ModelRegistry as a CompletionProvider
pub struct RegistryProvider {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryProvider {
    pub fn new(registry: Arc<ModelRegistry>, model_id: String) -> Self {
        Self { registry, model_id }
    }

    fn service(&self) -> Result<Arc<dyn LlmService>, LlmError> {
        self.registry
            .get(&self.model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| LlmError::unavailable("No LLM available"))
    }
}

#[async_trait]
impl CompletionProvider for RegistryProvider {
    async fn create_session(&self, seed: &str) -> Result<Arc<dyn ChatSession>, LlmError> {
        let service = self.service()?;
        Ok(Arc::new(LlmChatSession::new(service, seed)))
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self.service()?.complete(&LlmRequest::prompt(prompt)).await?;
        Ok(response.text)
    }
}

/// Session kept as a running history replayed on every turn
pub struct LlmChatSession {
    service: Arc<dyn LlmService>,
    history: Arc<Mutex<Vec<LlmMessage>>>,
}

impl LlmChatSession {
    pub fn new(service: Arc<dyn LlmService>, seed: &str) -> Self {
        let history = vec![
            LlmMessage::user(seed_turn(seed)),
            LlmMessage::model(SESSION_ACKNOWLEDGEMENT),
        ];
        Self {
            service,
            history: Arc::new(Mutex::new(history)),
        }
    }

    fn snapshot(&self) -> Result<Vec<LlmMessage>, LlmError> {
        self.history
            .lock()
            .map(|h| h.clone())
            .map_err(|_| LlmError::unknown("Session history lock poisoned"))
    }
}

#[async_trait]
impl ChatSession for LlmChatSession {
    async fn send_streaming(&self, text: &str) -> Result<TextStream, LlmError> {
        let mut messages = self.snapshot()?;
        messages.push(LlmMessage::user(text));
        let request = LlmRequest {
            system: None,
            messages,
            max_tokens: None,
        };

        let mut upstream = self.service.complete_stream(&request).await?;
        let history = Arc::clone(&self.history);
        let user_text = text.to_string();

        // Both turns join the history only once the reply has fully arrived
        Ok(Box::pin(async_stream::stream! {
            let mut reply = String::new();
            let mut failed = false;
            while let Some(item) = upstream.next().await {
                match &item {
                    Ok(chunk) => reply.push_str(chunk),
                    Err(_) => failed = true,
                }
                yield item;
                if failed {
                    break;
                }
            }
            if !failed {
                if let Ok(mut h) = history.lock() {
                    h.push(LlmMessage::user(user_text));
                    h.push(LlmMessage::model(reply));
                }
            }
        }))
    }
}
