//! Model implementations for Conduit.
//!
//! This crate provides concrete implementations of the `Model` trait, the
//! constructor table that turns backend configuration into adapters, and the
//! response cache used by the router.
//!
//! # Supported Backends
//!
//! - **Echo**: Returns the prompt unchanged (smoke tests, dry runs)
//! - **Mock**: Deterministic canned text for testing and development
//! - **OpenAI-compatible**: OpenAI, OpenRouter, vLLM, Ollama, LM Studio
//! - **Claude**: Anthropic's Messages API

pub mod cache;
pub mod claude;
pub mod factory;
mod http;
pub mod universal;

use async_trait::async_trait;
use conduit_abstraction::{Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use tracing::debug;

pub use cache::{
    CacheConfig, CacheConfigError, CacheError, CacheKey, CacheStats, CacheStore, InMemoryStore,
    ResponseCache,
};
pub use claude::ClaudeModel;
pub use factory::{BackendConfig, BackendKind, FactoryError, ModelConstructor, ModelFactory};
pub use http::DEFAULT_HTTP_TIMEOUT;
pub use universal::UniversalModel;

/// Returns the prompt unchanged as the generated text.
#[derive(Debug, Clone, Default)]
pub struct EchoModel {
    id: String,
}

impl EchoModel {
    /// Creates a new `EchoModel` with the given ID.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Model for EchoModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(model_id = %self.id, prompt_len = prompt.len(), "EchoModel generating text");

        let tokens = count_tokens(prompt);
        Ok(ModelResponse {
            content: prompt.to_string(),
            model_id: parameters.and_then(|p| p.model).or_else(|| Some(self.id.clone())),
            usage: Some(ModelUsage {
                prompt_tokens: tokens,
                completion_tokens: tokens,
                total_tokens: tokens * 2,
            }),
        })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// A mock implementation of the `Model` trait for testing and demonstration.
#[derive(Debug, Clone, Default)]
pub struct MockModel {
    id: String,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            prompt = %prompt,
            parameters = ?parameters,
            "MockModel generating text"
        );

        let target = parameters.and_then(|p| p.model).unwrap_or_else(|| self.id.clone());
        let response_content = format!("Mock response for: {prompt}\nModel ID: {target}");

        let prompt_tokens = count_tokens(prompt);
        let completion_tokens = count_tokens(&response_content);
        let total_tokens = prompt_tokens + completion_tokens;

        Ok(ModelResponse {
            content: response_content,
            model_id: Some(target),
            usage: Some(ModelUsage { prompt_tokens, completion_tokens, total_tokens }),
        })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Count tokens in a string (simplified: word count).
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_model_returns_prompt() {
        let model = EchoModel::new("echo".to_string());
        let response = model.generate_text("hi there", None).await.unwrap();
        assert_eq!(response.content, "hi there");
        assert_eq!(response.model_id.as_deref(), Some("echo"));
        assert_eq!(response.usage.unwrap().prompt_tokens, 2);
    }

    #[tokio::test]
    async fn test_mock_model_uses_requested_model() {
        let model = MockModel::new("mock".to_string());
        let params = ModelParameters::new().with_model("mock-large");
        let response = model.generate_text("ping", Some(params)).await.unwrap();
        assert!(response.content.starts_with("Mock response for: ping"));
        assert!(response.content.contains("mock-large"));
    }

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("  one two\nthree "), 3);
    }
}
