//! LLM error types

use thiserror::Error;

/// LLM error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unavailable, message)
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Stream, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            400 => Self::new(
                LlmErrorKind::InvalidRequest,
                format!("Invalid request: {message}"),
            ),
            401 | 403 => Self::new(
                LlmErrorKind::Auth,
                format!("Authentication failed: {message}"),
            ),
            429 => Self::new(
                LlmErrorKind::RateLimit,
                format!("Rate limit exceeded: {message}"),
            ),
            500..=599 => Self::new(
                LlmErrorKind::ServerError,
                format!("Server error: {message}"),
            ),
            _ => Self::unknown(format!("HTTP {status}: {message}")),
        }
    }

    /// Classify a transport failure
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {e}"))
        } else {
            Self::unknown(format!("Request failed: {e}"))
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Network issues, timeouts
    Network,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Bad request (400)
    InvalidRequest,
    /// No model configured
    Unavailable,
    /// Stream broke after it started
    Stream,
    Unknown,
}

impl LlmErrorKind {
    /// Transient failures a user retry may fix
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::RateLimit | Self::ServerError | Self::Stream
        )
    }
}
