//! OpenAI `chat/completions` backend.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthError, LlmError};
use crate::llm::provider::{GenerationRequest, TextGenerator, read_success_body, transport_error};
use crate::llm::{CONNECTIVITY_PROBE, LlmConfig};
use crate::services::{AuthState, Authenticatable};

const PROVIDER: &str = "openai";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI chat-completions text generation.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    default_max_tokens: u32,
    timeout: Duration,
    auth: AuthState,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_max_tokens: config.max_tokens,
            timeout: config.timeout,
            auth: AuthState::new(),
        })
    }
}

fn first_choice_text(body: &str) -> Result<String, LlmError> {
    let response: ChatResponse = serde_json::from_str(body)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "response contained no choices".into(),
        })
}

#[async_trait]
impl Authenticatable for OpenAiProvider {
    fn service_name(&self) -> &str {
        PROVIDER
    }

    async fn authenticate(&self) -> Result<(), AuthError> {
        self.generate_text(GenerationRequest::new(CONNECTIVITY_PROBE))
            .await
            .map(|_| ())
            .map_err(|e| AuthError::Request {
                service: PROVIDER.into(),
                reason: e.to_string(),
            })
    }

    fn auth_state(&self) -> &AuthState {
        &self.auth
    }
}

#[async_trait]
impl TextGenerator for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_text(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let payload = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            top_p: 0.8,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, self.timeout, e))?;

        let body = read_success_body(PROVIDER, self.timeout, response).await?;
        let text = first_choice_text(&body)?;
        debug!(model = %self.model, chars = text.len(), "Generated text");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_is_returned() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Hello!"}},{"index":1,"message":{"role":"assistant","content":"Other"}}]}"#;
        assert_eq!(first_choice_text(body).unwrap(), "Hello!");
    }

    #[test]
    fn no_choices_is_invalid() {
        assert!(matches!(
            first_choice_text(r#"{"choices":[]}"#).unwrap_err(),
            LlmError::InvalidResponse { .. }
        ));
    }

    #[test]
    fn null_content_is_invalid() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert!(first_choice_text(body).is_err());
    }
}
