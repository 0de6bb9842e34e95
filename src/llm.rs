//! LLM provider abstraction
//!
//! Provides a common interface for one-shot and streamed completions.

mod error;
mod gemini;
mod registry;
mod types;

pub use error::LlmError;
#[cfg(test)]
pub use error::LlmErrorKind;
pub use registry::{LlmConfig, ModelRegistry};
pub use types::*;

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Make a completion request, receiving text increments as they arrive
    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let start = Instant::now();
        let mut stream = match self.inner.complete_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM stream failed to open"
                );
                return Err(e);
            }
        };

        let model_id = self.model_id.clone();
        Ok(Box::pin(async_stream::stream! {
            let mut chunks = 0usize;
            while let Some(item) = stream.next().await {
                match &item {
                    Ok(_) => chunks += 1,
                    Err(e) => tracing::error!(
                        model = %model_id,
                        chunks,
                        error = %e.message,
                        "LLM stream broke"
                    ),
                }
                yield item;
            }
            tracing::info!(
                model = %model_id,
                duration_ms = %start.elapsed().as_millis(),
                chunks,
                "LLM stream completed"
            );
        }))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
