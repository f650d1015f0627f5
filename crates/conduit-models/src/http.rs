//! Shared HTTP plumbing for the provider adapters.

use std::time::Duration;

use conduit_abstraction::ModelError;
use reqwest::{Client, StatusCode};

/// Default per-request timeout applied to provider HTTP clients.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the reqwest client used by an adapter.
pub(crate) fn build_client(timeout: Duration) -> Result<Client, ModelError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ModelError::RequestError(format!("Failed to create HTTP client: {}", e)))
}

/// Maps a transport failure to a `ModelError`.
pub(crate) fn map_send_error(err: &reqwest::Error, timeout: Duration) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout(timeout.as_millis() as u64)
    } else {
        ModelError::RequestError(format!("Network error: {}", err))
    }
}

/// Maps a non-success provider status to a `ModelError`.
///
/// 401/403 are credential failures, 402 and quota-worded 429 bodies are hard
/// quota stops, any other 429 is a rate limit, everything else is a response
/// error.
pub(crate) fn map_error_status(
    provider: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: String,
) -> ModelError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ModelError::Authentication(format!(
            "Authentication failed ({}): {}",
            status, body
        ));
    }

    let lowered = body.to_lowercase();
    let quota_worded = lowered.contains("exceeded your current quota")
        || lowered.contains("insufficient_quota")
        || lowered.contains("quota");

    if status == StatusCode::PAYMENT_REQUIRED
        || (status == StatusCode::TOO_MANY_REQUESTS && quota_worded)
    {
        return ModelError::QuotaExceeded { provider: provider.to_string(), message: Some(body) };
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ModelError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs: retry_after,
        };
    }

    if status.is_server_error() {
        return ModelError::ModelResponseError(format!("Server error ({}): {}", status, body));
    }

    ModelError::ModelResponseError(format!("API error ({}): {}", status, body))
}

/// Reads the `retry-after` header as whole seconds, if present.
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
