//! LLM integration for leadflow.
//!
//! Supports:
//! - **Gemini**: `generateContent` with an API key query parameter
//! - **OpenAI**: `chat/completions` with a bearer key
//!
//! Both are plain reqwest clients behind the `TextGenerator` trait.

pub mod gemini;
pub mod openai;
pub mod provider;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use provider::*;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::{Lookup, env_parse, env_string};
use crate::error::{ConfigError, LlmError};

/// Prompt used to verify a backend is reachable and the key is accepted.
pub(crate) const CONNECTIVITY_PROBE: &str = "Reply with a short greeting.";

/// Per-request timeout for generation calls.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmBackend {
    #[default]
    Gemini,
    OpenAi,
}

impl LlmBackend {
    fn api_key_var(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash-lite",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }
}

impl FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "LLM_BACKEND".into(),
                message: format!("unknown backend '{other}' (expected gemini or openai)"),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    /// Token limit when a request doesn't set its own.
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl LlmConfig {
    /// Build from environment variables. The selected backend's API key is required.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let backend = match env_string(lookup, "LLM_BACKEND") {
            Some(name) => name.parse()?,
            None => LlmBackend::default(),
        };

        let key_var = backend.api_key_var();
        let api_key = env_string(lookup, key_var)
            .ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

        Ok(Self {
            backend,
            api_key: SecretString::from(api_key),
            model: env_string(lookup, "LLM_MODEL")
                .unwrap_or_else(|| backend.default_model().to_string()),
            base_url: env_string(lookup, "LLM_BASE_URL")
                .unwrap_or_else(|| backend.default_base_url().to_string()),
            max_tokens: env_parse(lookup, "LLM_MAX_TOKENS", 2048),
            timeout: GENERATION_TIMEOUT,
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    match config.backend {
        LlmBackend::Gemini => {
            tracing::info!("Using Gemini (model: {})", config.model);
            Ok(Arc::new(GeminiProvider::new(config)?))
        }
        LlmBackend::OpenAi => {
            tracing::info!("Using OpenAI (model: {})", config.model);
            Ok(Arc::new(OpenAiProvider::new(config)?))
        }
    }
}
