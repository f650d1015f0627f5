//! Universal OpenAI-compatible model implementation.
//!
//! Talks to any server implementing the OpenAI Chat Completions API:
//! OpenAI itself, OpenRouter, vLLM, LocalAI, LM Studio and Ollama's
//! `/v1` endpoints.
//!
//! One `UniversalModel` serves a whole backend. The provider-side model
//! identifier comes from `ModelParameters::model` on each call and falls back
//! to the default configured at construction.
//!
//! ```no_run
//! use conduit_abstraction::{Model, ModelParameters};
//! use conduit_models::UniversalModel;
//!
//! # async fn example() -> Result<(), conduit_abstraction::ModelError> {
//! let model = UniversalModel::without_auth("local".to_string(), "http://localhost:1234/v1".to_string());
//! let params = ModelParameters::new().with_model("llama-3-8b");
//! let response = model.generate_text("Say hello", Some(params)).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use conduit_abstraction::{Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::http::{
    DEFAULT_HTTP_TIMEOUT, build_client, map_error_status, map_send_error, retry_after_secs,
};

/// Universal OpenAI-compatible model implementation.
#[derive(Debug, Clone)]
pub struct UniversalModel {
    /// Backend identifier (e.g., "openai", "openrouter", "local").
    backend_id: String,
    /// Base URL for the API endpoint (e.g., "http://localhost:8000/v1").
    base_url: String,
    /// Optional API key (some local servers don't require auth).
    api_key: Option<String>,
    /// Model used when a call does not name one.
    default_model: Option<String>,
    /// Per-request timeout.
    timeout: Duration,
    /// HTTP client for requests.
    client: Client,
}

impl UniversalModel {
    /// Creates a new `UniversalModel` with an explicit API key.
    ///
    /// # Arguments
    /// * `backend_id` - The backend identifier
    /// * `base_url` - The base URL for the API endpoint
    /// * `api_key` - The API key for authentication
    #[must_use]
    pub fn with_api_key(backend_id: String, base_url: String, api_key: String) -> Self {
        Self {
            backend_id,
            base_url,
            api_key: Some(api_key),
            default_model: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
            client: build_client(DEFAULT_HTTP_TIMEOUT).unwrap_or_else(|_| Client::new()),
        }
    }

    /// Creates a new `UniversalModel` without authentication.
    ///
    /// Use this constructor for local servers that don't require API keys.
    #[must_use]
    pub fn without_auth(backend_id: String, base_url: String) -> Self {
        Self {
            backend_id,
            base_url,
            api_key: None,
            default_model: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
            client: build_client(DEFAULT_HTTP_TIMEOUT).unwrap_or_else(|_| Client::new()),
        }
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

    fn resolve_model(&self, parameters: Option<&ModelParameters>) -> Result<String, ModelError> {
        parameters
            .and_then(|p| p.model.clone())
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| {
                ModelError::RequestError(format!(
                    "No model identifier given for backend '{}'",
                    self.backend_id
                ))
            })
    }
}

#[async_trait]
impl Model for UniversalModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let model = self.resolve_model(parameters.as_ref())?;
        debug!(
            backend = %self.backend_id,
            model = %model,
            prompt_len = prompt.len(),
            "UniversalModel generating text"
        );

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut request_body = OpenAIRequest {
            model: model.clone(),
            messages: vec![OpenAIMessage { role: "user".to_string(), content: prompt.to_string() }],
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            extra: serde_json::Map::new(),
        };

        if let Some(params) = parameters {
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            request_body.max_tokens = params.max_tokens;
            request_body.stop = params.stop_sequences;
            request_body.extra.extend(params.extra);
        }

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to send request to OpenAI-compatible API");
            map_send_error(&e, self.timeout)
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %error_text,
                url = %url,
                "OpenAI-compatible API returned error status"
            );
            return Err(map_error_status(&self.backend_id, status, retry_after, error_text));
        }

        let openai_response: OpenAIResponse = response.json().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to parse OpenAI-compatible API response");
            ModelError::SerializationError(format!("Failed to parse response: {}", e))
        })?;

        let content = openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::ModelResponseError("No content in API response".to_string()))?;

        let usage = openai_response.usage.map(|u| ModelUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse { content, model_id: Some(model), usage })
    }

    fn model_id(&self) -> &str {
        &self.backend_id
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)] // Matches API naming
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
