//! One-shot advisor calls: expense review and stock commentary

use crate::db::Collection;
use crate::llm::LlmError;
use crate::runtime::{CompletionProvider, RecordStore};
use crate::system_prompt::{expense_analysis_prompt, stock_analysis_prompt, STOCK_ANALYSIS_ERROR};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Could not load records: {0}")]
    Store(String),
    #[error("No expenses to analyze")]
    NoExpenses,
    #[error(transparent)]
    Provider(#[from] LlmError),
}

/// Ask for spending-habit observations on all of the owner's expenses.
///
/// An owner with no expenses is rejected before the provider is called.
pub async fn analyze_expenses<S, P>(store: &S, provider: &P, owner_id: &str) -> Result<String, AnalysisError>
where
    S: RecordStore + ?Sized,
    P: CompletionProvider + ?Sized,
{
    let expenses = store
        .list_records(Collection::Expenses, owner_id)
        .await
        .map_err(AnalysisError::Store)?;
    if expenses.is_empty() {
        return Err(AnalysisError::NoExpenses);
    }
    tracing::info!(owner_id, count = expenses.len(), "Analyzing expenses");
    let text = provider.complete(&expense_analysis_prompt(&expenses)).await?;
    Ok(text)
}

/// Latest commentary for a ticker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockAnalysis {
    pub symbol: String,
    pub text: String,
    /// Source links; the provider currently returns none
    pub urls: Vec<String>,
    /// False when `text` is the canned error
    pub ok: bool,
    pub analyzed_at: DateTime<Utc>,
}

/// What the stock view shows for one owner
#[derive(Debug, Clone, Default, Serialize)]
pub struct StockView {
    pub analysis: Option<StockAnalysis>,
    pub loading: bool,
}

/// Per-owner stock analysis state. The previous result stays visible while a
/// new one is loading.
#[derive(Default)]
pub struct StockDesk {
    latest: Mutex<HashMap<String, StockAnalysis>>,
    /// In-flight analyses per owner
    loading: Mutex<HashMap<String, usize>>,
}

/// Counts one in-flight analysis; released on drop so a cancelled request
/// does not leave the owner loading forever
struct LoadingGuard<'a> {
    loading: &'a Mutex<HashMap<String, usize>>,
    owner_id: String,
}

impl<'a> LoadingGuard<'a> {
    fn enter(loading: &'a Mutex<HashMap<String, usize>>, owner_id: &str) -> Self {
        *lock(loading).entry(owner_id.to_string()).or_default() += 1;
        Self {
            loading,
            owner_id: owner_id.to_string(),
        }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut loading = lock(self.loading);
        if let Some(count) = loading.get_mut(&self.owner_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                loading.remove(&self.owner_id);
            }
        }
    }
}

impl StockDesk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an analysis; a blank symbol does nothing and returns `None`.
    ///
    /// Provider failures are not errors here: the canned error text becomes
    /// the result.
    pub async fn analyze<P>(&self, provider: &P, owner_id: &str, symbol: &str) -> Option<StockAnalysis>
    where
        P: CompletionProvider + ?Sized,
    {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return None;
        }

        let guard = LoadingGuard::enter(&self.loading, owner_id);
        let result = provider.complete(&stock_analysis_prompt(&symbol)).await;
        drop(guard);

        let (text, ok) = match result {
            Ok(text) => (text, true),
            Err(e) => {
                tracing::warn!(owner_id, symbol = %symbol, error = %e, "Stock analysis failed");
                (STOCK_ANALYSIS_ERROR.to_string(), false)
            }
        };
        let analysis = StockAnalysis {
            symbol,
            text,
            urls: vec![],
            ok,
            analyzed_at: Utc::now(),
        };
        lock(&self.latest).insert(owner_id.to_string(), analysis.clone());
        Some(analysis)
    }

    pub fn current(&self, owner_id: &str) -> StockView {
        StockView {
            analysis: lock(&self.latest).get(owner_id).cloned(),
            loading: lock(&self.loading).contains_key(owner_id),
        }
    }

    pub fn clear(&self, owner_id: &str) {
        lock(&self.latest).remove(owner_id);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
