//! Gemini `generateContent` backend.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthError, LlmError};
use crate::llm::provider::{GenerationRequest, TextGenerator, read_success_body, transport_error};
use crate::llm::{CONNECTIVITY_PROBE, LlmConfig};
use crate::services::{AuthState, Authenticatable};

const PROVIDER: &str = "gemini";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Google Gemini text generation.
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    default_max_tokens: u32,
    timeout: Duration,
    auth: AuthState,
}

impl GeminiProvider {
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

/// Text of the first part of the first candidate.
fn first_candidate_text(body: &str) -> Result<String, LlmError> {
    let response: GenerateContentResponse = serde_json::from_str(body)?;
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "response contained no candidate text".into(),
        })
}

#[async_trait]
impl Authenticatable for GeminiProvider {
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
impl TextGenerator for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_text(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let payload = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
                top_p: 0.8,
                top_k: 10,
            },
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, self.timeout, e))?;

        let body = read_success_body(PROVIDER, self.timeout, response).await?;
        let text = first_candidate_text(&body)?;
        debug!(model = %self.model, chars = text.len(), "Generated text");
        Ok(text)
    }
}
