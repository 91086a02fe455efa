//! Error types for leadflow.

use std::time::Duration;

/// Top-level error type for the workflow.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Authentication errors shared by every remote service.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{service} credentials unavailable: {reason}")]
    CredentialsUnavailable { service: String, reason: String },

    #[error("{service} token exchange failed: {reason}")]
    TokenExchange { service: String, reason: String },

    #[error("{service} authentication request failed: {reason}")]
    Request { service: String, reason: String },
}

/// Failure signal returned by the retry wrapper once every attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetryError {
    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },
}

/// Mailbox channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Channel {name} request failed with status {status}: {body}")]
    RequestFailed {
        name: String,
        status: u16,
        body: String,
    },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error(transparent)]
    Retry(#[from] RetryError),
}

/// Text-generation backend errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned status {status}: {body}")]
    BadStatus {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// CRM client errors.
#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("CRM request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid CRM response: {0}")]
    InvalidResponse(String),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No service could be initialized")]
    InitializationFailed,

    #[error("Message {message_id} has no reply address")]
    NoRecipient { message_id: String },

    #[error("Channel fetch failed: {0}")]
    ChannelFetch(String),
}
