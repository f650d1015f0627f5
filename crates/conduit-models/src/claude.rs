//! Claude (Anthropic) model implementation.
//!
//! Implements the `Model` trait over Anthropic's Messages API. A single
//! `ClaudeModel` serves every Claude-family logical model on a backend; the
//! concrete model identifier arrives in `ModelParameters::model`.

use std::time::Duration;

use async_trait::async_trait;
use conduit_abstraction::{Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::http::{
    DEFAULT_HTTP_TIMEOUT, build_client, map_error_status, map_send_error, retry_after_secs,
};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Claude model implementation.
#[derive(Debug, Clone)]
pub struct ClaudeModel {
    /// Backend identifier (usually "anthropic").
    backend_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the Claude API.
    base_url: String,
    /// Model used when a call does not name one.
    default_model: Option<String>,
    /// Per-request timeout.
    timeout: Duration,
    /// HTTP client for making requests.
    client: Client,
}

impl ClaudeModel {
    /// Creates a new `ClaudeModel` with an API key.
    ///
    /// # Arguments
    /// * `backend_id` - The backend identifier
    /// * `api_key` - The API key for authentication
    #[must_use]
    pub fn with_api_key(backend_id: String, api_key: String) -> Self {
        Self {
            backend_id,
            api_key,
            base_url: ANTHROPIC_BASE_URL.to_string(),
            default_model: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
            client: build_client(DEFAULT_HTTP_TIMEOUT).unwrap_or_else(|_| Client::new()),
        }
    }

    /// Points the adapter at a different API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the model used when a call does not name one.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Replaces the HTTP timeout.
    ///
    /// # Errors
    /// Returns a `ModelError` if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ModelError> {
        self.client = build_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    /// Anthropic reports quota exhaustion with typed error bodies rather than
    /// distinct status codes.
    fn is_quota_body(body: &str) -> bool {
        let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
            return body.to_lowercase().contains("quota");
        };
        let error_type = json
            .get("error")
            .and_then(|e| e.get("type"))
            .or_else(|| json.get("type"))
            .and_then(serde_json::Value::as_str);
        matches!(error_type, Some("insufficient_quota" | "billing_error"))
    }
}

#[async_trait]
impl Model for ClaudeModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let model = parameters
            .as_ref()
            .and_then(|p| p.model.clone())
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| {
                ModelError::RequestError(format!(
                    "No model identifier given for backend '{}'",
                    self.backend_id
                ))
            })?;

        debug!(
            backend = %self.backend_id,
            model = %model,
            prompt_len = prompt.len(),
            "ClaudeModel generating text"
        );

        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));

        let mut request_body = ClaudeRequest {
            model: model.clone(),
            messages: vec![ClaudeMessage { role: "user".to_string(), content: prompt.to_string() }],
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            top_p: None,
            stop_sequences: None,
        };

        if let Some(params) = parameters {
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            if let Some(max_tokens) = params.max_tokens {
                request_body.max_tokens = max_tokens;
            }
            request_body.stop_sequences = params.stop_sequences;
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send request to Claude API");
                map_send_error(&e, self.timeout)
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Claude API returned error status");

            if status == StatusCode::TOO_MANY_REQUESTS && Self::is_quota_body(&error_text) {
                return Err(ModelError::QuotaExceeded {
                    provider: self.backend_id.clone(),
                    message: Some(error_text),
                });
            }
            return Err(map_error_status(&self.backend_id, status, retry_after, error_text));
        }

        let claude_response: ClaudeResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Claude API response");
            ModelError::SerializationError(format!("Failed to parse response: {}", e))
        })?;

        let content = claude_response
            .content
            .iter()
            .find(|c| c.content_type == "text")
            .and_then(|c| c.text.clone())
            .ok_or_else(|| {
                ModelError::ModelResponseError("No text content in API response".to_string())
            })?;

        let usage = claude_response.usage.map(|u| ModelUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ModelResponse { content, model_id: Some(model), usage })
    }

    fn model_id(&self) -> &str {
        &self.backend_id
    }
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    messages: Vec<ClaudeMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}
