//! Text-generation capability shared by every backend.

use async_trait::async_trait;

use crate::error::LlmError;
use crate::services::Authenticatable;

/// A single-prompt generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    /// Falls back to the backend's configured limit when unset.
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A text-completion backend. One HTTP request per call, no retry of its own.
#[async_trait]
pub trait TextGenerator: Authenticatable {
    fn model_name(&self) -> &str;

    /// Return the first candidate's text. Non-2xx responses and payloads
    /// without a candidate are errors.
    async fn generate_text(&self, request: GenerationRequest) -> Result<String, LlmError>;
}

/// Map a reqwest failure into an [`LlmError`], keeping timeouts distinct.
pub(crate) fn transport_error(
    provider: &str,
    timeout: std::time::Duration,
    e: reqwest::Error,
) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout {
            provider: provider.to_string(),
            timeout,
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Read a response body, turning non-2xx statuses into [`LlmError::BadStatus`].
pub(crate) async fn read_success_body(
    provider: &str,
    timeout: std::time::Duration,
    response: reqwest::Response,
) -> Result<String, LlmError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(provider, timeout, e))?;
    if !status.is_success() {
        return Err(LlmError::BadStatus {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}
