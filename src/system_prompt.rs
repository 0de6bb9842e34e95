//! Prompt and canned-message text for the advisor
//!
//! Everything the provider is asked, plus the fixed strings shown to the user
//! when it cannot answer.

use crate::db::Record;
use crate::summary::FinancialSummary;

/// Model turn that follows the seed instruction in every new session
pub const SESSION_ACKNOWLEDGEMENT: &str =
    "Understood. I am ready to act as your financial expert using the provided data.";

/// Shown in the transcript when a streamed reply fails
pub const CONNECTION_ERROR: &str = "Connection error. Please try again.";

/// Stock commentary shown when the provider call fails
pub const STOCK_ANALYSIS_ERROR: &str = "### Analysis Error\nI could not retrieve data for this ticker. Please check the symbol and try again.";

/// Seed instruction embedding the user's figures
pub fn seed_instruction(summary: &FinancialSummary) -> String {
    format!(
        "You are FinNova, a financial expert.\n\
         USER DATA:\n\
         - Balance: ${:.2}\n\
         - Income: ${:.2}\n\
         - Expenses: ${:.2}\n\
         \n\
         Act as a professional advisor. Keep answers concise.",
        summary.balance, summary.total_income, summary.total_expenses
    )
}

/// The user turn that carries the seed into a session's history
pub fn seed_turn(seed: &str) -> String {
    format!("System Instruction: {seed}")
}

pub fn welcome_message(summary: &FinancialSummary) -> String {
    format!(
        "Hello. I have loaded your financial profile (Net Balance: ${:.2}). I am ready to advise you.",
        summary.balance
    )
}

/// One-shot prompt asking for spending-habit observations.
///
/// Records are embedded as JSON; serialization of plain records cannot fail,
/// but an empty array is used if it somehow does.
pub fn expense_analysis_prompt(expenses: &[Record]) -> String {
    let json = serde_json::to_string(expenses).unwrap_or_else(|_| "[]".to_string());
    format!("Analyze these expenses and give 3 bullet points on spending habits: {json}")
}

pub fn stock_analysis_prompt(symbol: &str) -> String {
    format!("Analyze the stock {symbol} for risk and sentiment. Format as markdown.")
}
