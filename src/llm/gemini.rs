//! Google Gemini provider implementation

use super::types::{LlmRequest, LlmResponse, MessageRole, TextStream, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gemini models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiModel {
    Gemini25Flash,
    Gemini25Pro,
}

impl GeminiModel {
    pub const ALL: [GeminiModel; 2] = [GeminiModel::Gemini25Flash, GeminiModel::Gemini25Pro];

    pub fn model_id(self) -> &'static str {
        match self {
            GeminiModel::Gemini25Flash => "gemini-2.5-flash",
            GeminiModel::Gemini25Pro => "gemini-2.5-pro",
        }
    }
}

/// Gemini service implementation
pub struct GeminiService {
    client: Client,
    api_key: String,
    base_url: String,
    model_id: String,
}

impl GeminiService {
    pub fn new(api_key: String, model: GeminiModel, gateway: Option<&str>) -> Result<Self, LlmError> {
        let base_url = match gateway {
            Some(gw) => format!(
                "{}/gemini/v1beta/models/{}",
                gw.trim_end_matches('/'),
                model.model_id()
            ),
            None => format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}",
                model.model_id()
            ),
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model_id: model.model_id().to_string(),
        })
    }

    fn url(&self, method: &str, streaming: bool) -> String {
        let mut url = format!("{}:{method}", self.base_url);
        let mut query = Vec::new();
        if streaming {
            query.push("alt=sse".to_string());
        }
        // Gateway mode authenticates on its own
        if !self.api_key.starts_with("implicit") {
            query.push(format!("key={}", self.api_key));
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let system_instruction = request.system.as_ref().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text: text.clone() }],
        });

        let contents = request
            .messages
            .iter()
            .filter(|msg| !msg.text.is_empty())
            .map(|msg| GeminiContent {
                role: Some(
                    match msg.role {
                        MessageRole::User => "user",
                        MessageRole::Model => "model",
                    }
                    .to_string(),
                ),
                parts: vec![GeminiPart {
                    text: msg.text.clone(),
                }],
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: request.max_tokens.map(|t| GeminiGenerationConfig {
                max_output_tokens: Some(t),
            }),
        }
    }

    fn error_from_body(status: u16, body: &str) -> LlmError {
        match serde_json::from_str::<GeminiErrorResponse>(body) {
            Ok(error_resp) => LlmError::from_status(status, &error_resp.error.message),
            Err(_) => LlmError::from_status(status, body),
        }
    }

    /// Concatenated text of the first candidate
    fn candidate_text(resp: &GeminiResponse) -> String {
        resp.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn normalize_response(resp: &GeminiResponse) -> Result<LlmResponse, LlmError> {
        if resp.candidates.is_empty() {
            return Err(LlmError::unknown("No candidates in response"));
        }

        let usage = resp
            .usage_metadata
            .as_ref()
            .map(|u| Usage {
                input_tokens: u64::from(u.prompt_token_count),
                output_tokens: u64::from(u.candidates_token_count),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            text: Self::candidate_text(resp),
            usage,
        })
    }

    /// Text carried by one SSE `data:` payload, if any
    fn chunk_text(data: &str) -> Result<Option<String>, LlmError> {
        let resp: GeminiResponse = serde_json::from_str(data)
            .map_err(|e| LlmError::stream(format!("Malformed stream chunk: {e}")))?;
        let text = Self::candidate_text(&resp);
        Ok((!text.is_empty()).then_some(text))
    }
}

#[async_trait]
impl LlmService for GeminiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let gemini_request = Self::translate_request(request);

        let response = self
            .client
            .post(self.url("generateContent", false))
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::error_from_body(status.as_u16(), &body));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::unknown(format!("Failed to parse response: {e}")))?;

        Self::normalize_response(&gemini_response)
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let gemini_request = Self::translate_request(request);

        let response = self
            .client
            .post(self.url("streamGenerateContent", true))
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error_from_body(status.as_u16(), &body));
        }

        let mut events = Box::pin(response.bytes_stream().eventsource());

        Ok(Box::pin(async_stream::try_stream! {
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| LlmError::stream(e.to_string()))?;
                if let Some(text) = Self::chunk_text(&event.data)? {
                    yield text;
                }
            }
        }))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}
