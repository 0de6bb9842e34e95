//! Model registry for the configured completion models

use super::gemini::{GeminiModel, GeminiService};
use super::{LlmService, LoggingService};
use std::collections::HashMap;
use std::sync::Arc;

const PREFERRED_DEFAULT: &str = "gemini-2.5-flash";

/// Configuration for LLM providers
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub gemini_api_key: Option<String>,
    /// Gateway URL; requests go through it with an implicit key
    pub gateway: Option<String>,
    /// Default model ID
    pub default_model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            gateway: std::env::var("LLM_GATEWAY").ok(),
            default_model: std::env::var("DEFAULT_MODEL").ok(),
        }
    }
}

/// Registry of available LLM models
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
}

impl ModelRegistry {
    /// Create an empty registry for testing purposes
    #[allow(dead_code)] // Used in tests
    pub fn new_empty() -> Self {
        Self {
            services: HashMap::new(),
            default_model: PREFERRED_DEFAULT.to_string(),
        }
    }

    pub fn new(config: &LlmConfig) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        for model in GeminiModel::ALL {
            if let Some(service) = Self::try_create_model(model, config) {
                services.insert(model.model_id().to_string(), service);
            }
        }

        let default_model = config
            .default_model
            .clone()
            .unwrap_or_else(|| PREFERRED_DEFAULT.to_string());

        Self {
            services,
            default_model,
        }
    }

    /// Try to create a model service, validating prerequisites
    fn try_create_model(model: GeminiModel, config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
        let api_key = if config.gateway.is_some() {
            "implicit".to_string()
        } else {
            config.gemini_api_key.clone().filter(|k| !k.is_empty())?
        };

        match GeminiService::new(api_key, model, config.gateway.as_deref()) {
            Ok(service) => Some(Arc::new(LoggingService::new(Arc::new(service)))),
            Err(e) => {
                tracing::warn!(model = model.model_id(), error = %e, "Failed to create model");
                None
            }
        }
    }

    /// Get a model by ID
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Get the default model
    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }

    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.services.keys().cloned().collect();
        models.sort();
        models
    }
}
