//! API request and response types

use crate::ledger::LedgerEntry;
use crate::state_machine::Identity;
use crate::summary::{CategoryTotal, FinancialSummary};
use serde::{Deserialize, Serialize};

/// Sign-up and sign-in body
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

/// Response for a successful sign-up or sign-in
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: Identity,
}

/// Response with the signed-in user
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: Identity,
}

/// One month of the illustrative cash-flow chart
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CashFlowPoint {
    pub name: &'static str,
    pub savings: u32,
    pub expenses: u32,
}

/// Static chart data shown on the dashboard; not derived from stored records
pub const CASH_FLOW: [CashFlowPoint; 7] = [
    CashFlowPoint { name: "Jan", savings: 4000, expenses: 2400 },
    CashFlowPoint { name: "Feb", savings: 3000, expenses: 1398 },
    CashFlowPoint { name: "Mar", savings: 2000, expenses: 9800 },
    CashFlowPoint { name: "Apr", savings: 2780, expenses: 3908 },
    CashFlowPoint { name: "May", savings: 1890, expenses: 4800 },
    CashFlowPoint { name: "Jun", savings: 2390, expenses: 3800 },
    CashFlowPoint { name: "Jul", savings: 3490, expenses: 4300 },
];

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub summary: FinancialSummary,
    pub cash_flow: &'static [CashFlowPoint],
}

/// A collection as currently shown, with per-category totals for the chart
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub entries: Vec<LedgerEntry>,
    pub total: f64,
    pub categories: Vec<CategoryTotal>,
}

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Response for chat action
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub symbol: String,
}

/// One-shot analysis text
#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub text: String,
}

/// Response for model listing
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
    pub default: String,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
