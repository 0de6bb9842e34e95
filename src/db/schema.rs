//! Database schema and record types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SQL schema for initialization
///
/// `amount` is declared without a type so rows written by other tools keep
/// whatever value they were given; reads normalise it (see `amount_from_sql`).
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS expenses (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    description TEXT NOT NULL,
    amount,
    category TEXT NOT NULL,
    date TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_expenses_owner ON expenses(owner_id, date DESC);

CREATE TABLE IF NOT EXISTS savings (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    description TEXT NOT NULL,
    amount,
    category TEXT NOT NULL,
    date TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_savings_owner ON savings(owner_id, date DESC);
";

/// Owner-scoped record collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Expenses,
    Savings,
}

impl Collection {
    /// Table backing this collection
    pub fn table(self) -> &'static str {
        match self {
            Collection::Expenses => "expenses",
            Collection::Savings => "savings",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expenses" => Ok(Collection::Expenses),
            "savings" => Ok(Collection::Savings),
            other => Err(format!("Unknown collection: {other}")),
        }
    }
}

/// A stored expense or saving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub owner_id: String,
    pub description: String,
    /// `None` when the stored value is missing or not a finite number
    pub amount: Option<f64>,
    pub category: String,
    pub date: String,
}

impl Record {
    /// Amount contribution for totals; malformed amounts count as zero
    pub fn amount_or_zero(&self) -> f64 {
        self.amount.unwrap_or(0.0)
    }
}

/// Record fields supplied by the caller; the store assigns the id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub description: String,
    pub amount: f64,
    pub category: String,
    pub date: String,
}

impl NewRecord {
    /// Materialise as a record with the given id and owner
    pub fn into_record(self, id: impl Into<String>, owner_id: impl Into<String>) -> Record {
        Record {
            id: id.into(),
            owner_id: owner_id.into(),
            description: self.description,
            amount: Some(self.amount),
            category: self.category,
            date: self.date,
        }
    }

    /// Check required fields before anything touches the store
    pub fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("Description is required".to_string());
        }
        if self.date.trim().is_empty() {
            return Err("Date is required".to_string());
        }
        if !self.amount.is_finite() {
            return Err("Amount must be a number".to_string());
        }
        Ok(())
    }
}

/// Stored user row (auth)
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: String,
}

/// Normalise a raw SQLite value into an amount
pub fn amount_from_sql(value: rusqlite::types::ValueRef<'_>) -> Option<f64> {
    use rusqlite::types::ValueRef;

    #[allow(clippy::cast_precision_loss)] // Amounts are far below 2^52
    let amount = match value {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(r) => Some(r),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    };
    amount.filter(|a| a.is_finite())
}
