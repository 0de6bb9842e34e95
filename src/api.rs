//! HTTP API for `FinNova`

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::analysis::StockDesk;
use crate::auth::AuthService;
use crate::db::Database;
use crate::ledger::Bookkeeper;
use crate::llm::ModelRegistry;
use crate::runtime::{ChatHub, CompletionProvider, DatabaseStorage, RecordStore, RegistryProvider};
use std::sync::Arc;

pub type SharedStore = Arc<dyn RecordStore>;
pub type SharedProvider = Arc<dyn CompletionProvider>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub store: SharedStore,
    pub provider: SharedProvider,
    pub chats: Arc<ChatHub<SharedStore, SharedProvider>>,
    pub books: Arc<Bookkeeper<dyn RecordStore>>,
    pub stocks: Arc<StockDesk>,
    pub llm_registry: Arc<ModelRegistry>,
}

impl AppState {
    pub fn new(db: Database, llm_registry: Arc<ModelRegistry>) -> Self {
        let store: SharedStore = Arc::new(DatabaseStorage::new(db.clone()));
        let provider: SharedProvider = Arc::new(RegistryProvider::new(
            llm_registry.clone(),
            llm_registry.default_model_id().to_string(),
        ));
        Self::with_parts(AuthService::new(db), store, provider, llm_registry)
    }

    /// Assemble from explicit collaborators
    pub fn with_parts(
        auth: AuthService,
        store: SharedStore,
        provider: SharedProvider,
        llm_registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            auth: Arc::new(auth),
            chats: Arc::new(ChatHub::new(Arc::new(store.clone()), Arc::new(provider.clone()))),
            books: Arc::new(Bookkeeper::new(store.clone())),
            stocks: Arc::new(StockDesk::new()),
            store,
            provider,
            llm_registry,
        }
    }
}
