//! Optimistic record updates
//!
//! Writes are applied locally first under a temporary id, then confirmed
//! against the store or rolled back to the last confirmed snapshot.

use crate::db::{Collection, NewRecord, Record};
use crate::runtime::RecordStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid record: {0}")]
    Invalid(String),
    #[error("Unknown record: {0}")]
    UnknownRecord(String),
    #[error("A change to {0} is already pending")]
    AlreadyPending(String),
    #[error("Store rejected the change: {0}")]
    Store(String),
}

/// A row as currently shown, tentative until the store confirms it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub record: Record,
    pub pending: bool,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Insert(Record),
    Remove(String),
}

impl PendingOp {
    fn key(&self) -> &str {
        match self {
            PendingOp::Insert(record) => &record.id,
            PendingOp::Remove(id) => id,
        }
    }
}

/// Confirmed records plus outstanding local changes, newest first
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    confirmed: Vec<Record>,
    pending: Vec<PendingOp>,
}

impl Ledger {
    #[cfg(test)]
    pub fn new(confirmed: Vec<Record>) -> Self {
        Self {
            confirmed,
            pending: vec![],
        }
    }

    /// Replace the confirmed snapshot, keeping pending changes on top
    pub fn reload(&mut self, confirmed: Vec<Record>) {
        self.confirmed = confirmed;
    }

    /// Add a tentative record under a fresh temporary id
    pub fn propose_insert(&mut self, owner_id: &str, record: NewRecord) -> String {
        let temp_id = format!("temp-{}", uuid::Uuid::new_v4());
        self.pending
            .push(PendingOp::Insert(record.into_record(temp_id.clone(), owner_id)));
        temp_id
    }

    /// Swap the tentative record for the stored one. A reload that landed
    /// between the store write and this call may already hold it.
    pub fn confirm_insert(&mut self, temp_id: &str, stored: Record) -> Result<(), LedgerError> {
        self.take_pending(temp_id)?;
        self.confirmed.retain(|r| r.id != stored.id);
        self.confirmed.insert(0, stored);
        Ok(())
    }

    /// Hide a confirmed record until the store agrees
    pub fn propose_remove(&mut self, id: &str) -> Result<(), LedgerError> {
        if !self.confirmed.iter().any(|r| r.id == id) {
            return Err(LedgerError::UnknownRecord(id.to_string()));
        }
        if self.pending.iter().any(|op| op.key() == id) {
            return Err(LedgerError::AlreadyPending(id.to_string()));
        }
        self.pending.push(PendingOp::Remove(id.to_string()));
        Ok(())
    }

    pub fn confirm_remove(&mut self, id: &str) -> Result<(), LedgerError> {
        self.take_pending(id)?;
        self.confirmed.retain(|r| r.id != id);
        Ok(())
    }

    /// Discard the pending change keyed by `id`; the view falls back to the
    /// confirmed snapshot for that row
    pub fn rollback(&mut self, id: &str) -> Result<(), LedgerError> {
        self.take_pending(id).map(|_| ())
    }

    /// What the user sees: pending inserts first, then confirmed records
    /// minus pending removals
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let inserts = self.pending.iter().rev().filter_map(|op| match op {
            PendingOp::Insert(record) => Some(LedgerEntry {
                record: record.clone(),
                pending: true,
            }),
            PendingOp::Remove(_) => None,
        });
        let kept = self
            .confirmed
            .iter()
            .filter(|r| {
                !self
                    .pending
                    .iter()
                    .any(|op| matches!(op, PendingOp::Remove(id) if *id == r.id))
            })
            .map(|r| LedgerEntry {
                record: r.clone(),
                pending: false,
            });
        inserts.chain(kept).collect()
    }

    fn take_pending(&mut self, key: &str) -> Result<PendingOp, LedgerError> {
        let idx = self
            .pending
            .iter()
            .position(|op| op.key() == key)
            .ok_or_else(|| LedgerError::UnknownRecord(key.to_string()))?;
        Ok(self.pending.remove(idx))
    }
}

/// Drives ledgers against the record store, one per owner and collection
pub struct Bookkeeper<S: RecordStore + ?Sized> {
    store: Arc<S>,
    ledgers: Mutex<HashMap<(String, Collection), Ledger>>,
}

impl<S: RecordStore + ?Sized> Bookkeeper<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    fn with_ledger<T>(&self, owner_id: &str, collection: Collection, f: impl FnOnce(&mut Ledger) -> T) -> T {
        let mut ledgers = self
            .ledgers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let ledger = ledgers
            .entry((owner_id.to_string(), collection))
            .or_default();
        f(ledger)
    }

    /// Refresh from the store and return the current view
    pub async fn list(&self, owner_id: &str, collection: Collection) -> Result<Vec<LedgerEntry>, LedgerError> {
        let records = self
            .store
            .list_records(collection, owner_id)
            .await
            .map_err(LedgerError::Store)?;
        Ok(self.with_ledger(owner_id, collection, |ledger| {
            ledger.reload(records);
            ledger.entries()
        }))
    }

    /// Current view without touching the store
    #[cfg(test)]
    pub fn view(&self, owner_id: &str, collection: Collection) -> Vec<LedgerEntry> {
        self.with_ledger(owner_id, collection, |ledger| ledger.entries())
    }

    pub async fn add(&self, owner_id: &str, collection: Collection, record: NewRecord) -> Result<Record, LedgerError> {
        record.validate().map_err(LedgerError::Invalid)?;
        let temp_id = self.with_ledger(owner_id, collection, |ledger| {
            ledger.propose_insert(owner_id, record.clone())
        });

        match self.store.insert_record(collection, owner_id, &record).await {
            Ok(stored) => {
                self.with_ledger(owner_id, collection, |ledger| {
                    ledger.confirm_insert(&temp_id, stored.clone())
                })?;
                tracing::debug!(owner_id, %collection, id = %stored.id, "Record added");
                Ok(stored)
            }
            Err(e) => {
                tracing::warn!(owner_id, %collection, error = %e, "Insert failed, rolling back");
                self.with_ledger(owner_id, collection, |ledger| ledger.rollback(&temp_id))?;
                Err(LedgerError::Store(e))
            }
        }
    }

    pub async fn remove(&self, owner_id: &str, collection: Collection, id: &str) -> Result<(), LedgerError> {
        let proposed = self.with_ledger(owner_id, collection, |ledger| ledger.propose_remove(id));
        if let Err(LedgerError::UnknownRecord(_)) = proposed {
            // Not loaded yet; refresh once and retry
            self.list(owner_id, collection).await?;
            self.with_ledger(owner_id, collection, |ledger| ledger.propose_remove(id))?;
        } else {
            proposed?;
        }

        match self.store.delete_record(collection, owner_id, id).await {
            Ok(()) => {
                self.with_ledger(owner_id, collection, |ledger| ledger.confirm_remove(id))?;
                tracing::debug!(owner_id, %collection, id, "Record removed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(owner_id, %collection, error = %e, "Delete failed, rolling back");
                self.with_ledger(owner_id, collection, |ledger| ledger.rollback(id))?;
                Err(LedgerError::Store(e))
            }
        }
    }
}
