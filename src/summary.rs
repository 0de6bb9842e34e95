//! Financial summary builder
//!
//! Reduces an owner's stored expense and saving records into the balance
//! figures used to seed a chat session.

use crate::db::{Collection, Record};
use crate::runtime::RecordStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSummary {
    pub total_income: f64,
    pub total_expenses: f64,
    pub balance: f64,
}

impl FinancialSummary {
    pub fn new(total_income: f64, total_expenses: f64) -> Self {
        Self {
            total_income,
            total_expenses,
            balance: total_income - total_expenses,
        }
    }

    /// Savings count as income. Records without a usable amount contribute zero.
    pub fn from_records(savings: &[Record], expenses: &[Record]) -> Self {
        Self::new(sum(savings), sum(expenses))
    }
}

fn sum(records: &[Record]) -> f64 {
    records.iter().map(Record::amount_or_zero).sum()
}

/// Query both collections concurrently and total them.
///
/// Never fails: a collection whose query errors is treated as empty.
pub async fn build_summary<S: RecordStore + ?Sized>(store: &S, owner_id: &str) -> FinancialSummary {
    let (expenses, savings) = tokio::join!(
        store.list_records(Collection::Expenses, owner_id),
        store.list_records(Collection::Savings, owner_id),
    );

    let expenses = expenses.unwrap_or_else(|e| {
        tracing::warn!(owner_id, error = %e, "Expense query failed, counting as empty");
        Vec::new()
    });
    let savings = savings.unwrap_or_else(|e| {
        tracing::warn!(owner_id, error = %e, "Savings query failed, counting as empty");
        Vec::new()
    });

    let summary = FinancialSummary::from_records(&savings, &expenses);
    tracing::debug!(
        owner_id,
        income = summary.total_income,
        expenses = summary.total_expenses,
        "Built financial summary"
    );
    summary
}

/// Spend per category, for the expense breakdown view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
}

/// Totals grouped by category, largest first; ties broken by name
pub fn category_totals(records: &[Record]) -> Vec<CategoryTotal> {
    let mut by_category: BTreeMap<&str, f64> = BTreeMap::new();
    for record in records {
        *by_category.entry(record.category.as_str()).or_default() += record.amount_or_zero();
    }

    let mut totals: Vec<_> = by_category
        .into_iter()
        .map(|(category, total)| CategoryTotal {
            category: category.to_string(),
            total,
        })
        .collect();
    totals.sort_by(|a, b| b.total.total_cmp(&a.total));
    totals
}
