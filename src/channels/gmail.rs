//! Gmail mailbox: REST v1 for search, fetch and send.
//!
//! Credentials come from the installed-app authenticator (see [`super::oauth`]).
//! Every remote operation runs through the shared retry wrapper; a 401 drops
//! the cached access token so the next attempt re-authenticates.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::Utc;
use lettre::message::header::ContentType;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::channels::email_types::{Message, is_from_self, parse_sender_address};
use crate::channels::oauth::{
    CONSENT_TIMEOUT, ConsentPrompt, GmailAuthenticator, access_token, build_authenticator,
    load_client_secret,
};
use crate::channels::Mailbox;
use crate::config::{Lookup, env_string};
use crate::error::{AuthError, ChannelError};
use crate::services::{AuthState, Authenticatable, RetryPolicy, execute_with_retry};

const CHANNEL: &str = "gmail";

// ── Configuration ───────────────────────────────────────────────────

/// Gmail client configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// OAuth client-secrets file (`installed` or `web` client).
    pub credentials_file: PathBuf,
    /// Token cache written by the authenticator.
    pub token_file: PathBuf,
    pub api_base: String,
    /// Replaces the token endpoint named in the client-secrets file.
    pub token_url: Option<String>,
}

impl GmailConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        Self {
            credentials_file: env_string(lookup, "GMAIL_CREDENTIALS_FILE")
                .unwrap_or_else(|| "credentials.json".into())
                .into(),
            token_file: env_string(lookup, "GMAIL_TOKEN_FILE")
                .unwrap_or_else(|| "token.json".into())
                .into(),
            api_base: env_string(lookup, "GMAIL_API_BASE")
                .unwrap_or_else(|| "https://gmail.googleapis.com/gmail/v1".into())
                .trim_end_matches('/')
                .to_string(),
            token_url: env_string(lookup, "GOOGLE_TOKEN_URL"),
        }
    }
}

// ── REST payloads ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GmailProfile {
    #[serde(rename = "emailAddress")]
    email_address: String,
}

#[derive(Debug, Default, Deserialize)]
struct GmailMessageList {
    #[serde(default)]
    messages: Vec<GmailMessageStub>,
}

#[derive(Debug, Deserialize)]
struct GmailMessageStub {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailMessage {
    pub id: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: Option<String>,
    pub payload: GmailPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GmailPayload {
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<GmailHeader>,
    #[serde(default)]
    pub body: Option<GmailBody>,
    #[serde(default)]
    pub parts: Vec<GmailPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GmailBody {
    #[serde(default)]
    pub data: Option<String>,
}

// ── Mailbox ─────────────────────────────────────────────────────────

struct GmailSession {
    access_token: SecretString,
    user_email: String,
}

/// Gmail REST mailbox.
pub struct GmailMailbox {
    config: GmailConfig,
    retry: RetryPolicy,
    http: reqwest::Client,
    authenticator: OnceCell<GmailAuthenticator>,
    session: Mutex<Option<GmailSession>>,
    auth: AuthState,
}

impl GmailMailbox {
    pub fn new(config: GmailConfig, retry: RetryPolicy) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(Self {
            config,
            retry,
            http,
            authenticator: OnceCell::new(),
            session: Mutex::new(None),
            auth: AuthState::new(),
        })
    }

    /// The authenticated mailbox's own address, once known.
    pub fn self_address(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.user_email.clone())
    }

    fn access_token(&self) -> Result<SecretString, ChannelError> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or_else(|| ChannelError::AuthFailed {
                name: CHANNEL.into(),
                reason: "no access token; not authenticated".into(),
            })
    }

    async fn gate(&self) -> Result<(), ChannelError> {
        self.ensure_authenticated()
            .await
            .map_err(|e| ChannelError::AuthFailed {
                name: CHANNEL.into(),
                reason: e.to_string(),
            })
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ChannelError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.auth.invalidate();
            return Err(ChannelError::AuthFailed {
                name: CHANNEL.into(),
                reason: "access token rejected (401)".into(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(ChannelError::RequestFailed {
                name: CHANNEL.into(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ChannelError::InvalidMessage(format!("malformed Gmail response: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ChannelError> {
        let token = self.access_token()?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        self.read_json(response).await
    }

    /// One search-and-fetch pass. Per-message failures are logged and skipped.
    async fn fetch_once(&self, query: &str, max_results: u32) -> Result<Vec<Message>, ChannelError> {
        self.gate().await?;

        let max = max_results.to_string();
        let list: GmailMessageList = self
            .get_json(
                &format!("{}/users/me/messages", self.config.api_base),
                &[("q", query), ("maxResults", max.as_str())],
            )
            .await?;

        let self_address = self.self_address().unwrap_or_default();
        let mut messages = Vec::with_capacity(list.messages.len());

        for stub in &list.messages {
            let fetched: Result<GmailMessage, ChannelError> = self
                .get_json(
                    &format!("{}/users/me/messages/{}", self.config.api_base, stub.id),
                    &[("format", "full")],
                )
                .await;

            let raw = match fetched {
                Ok(raw) => raw,
                Err(e @ ChannelError::AuthFailed { .. }) => return Err(e),
                Err(e) => {
                    warn!(message_id = %stub.id, error = %e, "Failed to fetch message, skipping");
                    continue;
                }
            };

            match message_from_gmail(&raw, &self_address) {
                Ok(Some(message)) => {
                    debug!(message_id = %message.id, thread_id = ?raw.thread_id, "Fetched message");
                    messages.push(message);
                }
                Ok(None) => {
                    debug!(message_id = %raw.id, "Skipping message sent by this mailbox");
                }
                Err(e) => {
                    warn!(message_id = %raw.id, error = %e, "Failed to decode message, skipping");
                }
            }
        }

        if !messages.is_empty() {
            info!(count = messages.len(), "Found new messages");
        }
        Ok(messages)
    }

    async fn send_once(&self, to: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        self.gate().await?;

        let from = self.self_address().unwrap_or_default();
        let raw = compose_raw_message(&from, to, subject, body)?;
        let token = self.access_token()?;
        let response = self
            .http
            .post(format!("{}/users/me/messages/send", self.config.api_base))
            .bearer_auth(token.expose_secret())
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let _: serde_json::Value = self.read_json(response).await?;
        Ok(())
    }

    async fn authenticator(&self) -> Result<&GmailAuthenticator, AuthError> {
        self.authenticator
            .get_or_try_init(|| async {
                let secret = load_client_secret(
                    &self.config.credentials_file,
                    self.config.token_url.as_deref(),
                )
                .await?;
                build_authenticator(secret, &self.config.token_file, Box::new(ConsentPrompt)).await
            })
            .await
    }

    async fn resolve_access_token(&self) -> Result<String, AuthError> {
        let auth = self.authenticator().await?;
        // An earlier session means its token was rejected or has aged out.
        let force_refresh = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        access_token(auth, force_refresh, CONSENT_TIMEOUT).await
    }
}

#[async_trait]
impl Authenticatable for GmailMailbox {
    fn service_name(&self) -> &str {
        CHANNEL
    }

    async fn authenticate(&self) -> Result<(), AuthError> {
        let access_token = self.resolve_access_token().await?;

        let response = self
            .http
            .get(format!("{}/users/me/profile", self.config.api_base))
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| AuthError::Request {
                service: CHANNEL.into(),
                reason: format!("profile request failed: {e}"),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Request {
                service: CHANNEL.into(),
                reason: format!("profile request returned {status}"),
            });
        }
        let profile: GmailProfile = response.json().await.map_err(|e| AuthError::Request {
            service: CHANNEL.into(),
            reason: format!("malformed profile: {e}"),
        })?;

        info!(user = %profile.email_address, "Gmail authenticated");
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(GmailSession {
            access_token: SecretString::from(access_token),
            user_email: profile.email_address,
        });
        Ok(())
    }

    fn auth_state(&self) -> &AuthState {
        &self.auth
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn get_recent_messages(
        &self,
        lookback_minutes: u32,
        max_results: u32,
    ) -> Result<Vec<Message>, ChannelError> {
        let after = Utc::now().timestamp() - i64::from(lookback_minutes) * 60;
        let query = build_search_query(after);
        info!(query = %query, max_results, "Searching mailbox");

        let query = query.as_str();
        let messages = execute_with_retry(self, &self.retry, "fetch recent messages", move || {
            async move { self.fetch_once(query, max_results).await }
        })
        .await?;
        Ok(messages)
    }

    async fn send_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        original_message_id: &str,
    ) -> Result<(), ChannelError> {
        parse_address("to", to)?;

        let operation = format!("send reply to {to}");
        execute_with_retry(self, &self.retry, &operation, move || async move {
            self.send_once(to, subject, body).await
        })
        .await?;

        info!(to, original_message_id, "Reply sent");
        Ok(())
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Search query for inbox mail received after `after_unix` and not sent by us.
pub fn build_search_query(after_unix: i64) -> String {
    format!("after:{after_unix} -from:me in:inbox")
}

fn header_value<'a>(payload: &'a GmailPayload, name: &str) -> Option<&'a str> {
    payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn non_empty_data(payload: &GmailPayload) -> Option<&str> {
    payload
        .body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .filter(|d| !d.is_empty())
}

/// Encoded body text: top-level body data, else the first `text/plain`
/// part found depth-first.
pub(crate) fn plain_text_data(payload: &GmailPayload) -> Option<&str> {
    non_empty_data(payload).or_else(|| first_plain_part(&payload.parts))
}

fn first_plain_part(parts: &[GmailPayload]) -> Option<&str> {
    for part in parts {
        let is_plain = part
            .mime_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("text/plain"));
        if is_plain && let Some(data) = non_empty_data(part) {
            return Some(data);
        }
        if let Some(data) = first_plain_part(&part.parts) {
            return Some(data);
        }
    }
    None
}

/// base64url-decode body data into trimmed text. Invalid UTF-8 is replaced.
pub fn decode_body_data(data: &str) -> Result<String, ChannelError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim().trim_end_matches('='))
        .map_err(|e| ChannelError::InvalidMessage(format!("body is not base64url: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

/// Convert a fetched message. `Ok(None)` means the message came from us.
pub(crate) fn message_from_gmail(
    raw: &GmailMessage,
    self_address: &str,
) -> Result<Option<Message>, ChannelError> {
    let from = header_value(&raw.payload, "From").unwrap_or_default();
    if is_from_self(from, self_address) {
        return Ok(None);
    }

    let body = match plain_text_data(&raw.payload) {
        Some(data) => decode_body_data(data)?,
        None => String::new(),
    };

    Ok(Some(Message {
        id: raw.id.clone(),
        sender: parse_sender_address(from),
        subject: header_value(&raw.payload, "Subject")
            .unwrap_or_default()
            .to_string(),
        body,
    }))
}

fn parse_address(what: &str, value: &str) -> Result<lettre::message::Mailbox, ChannelError> {
    value.parse().map_err(|e| ChannelError::SendFailed {
        name: CHANNEL.into(),
        reason: format!("Invalid {what} address: {e}"),
    })
}

/// Build a plain-text RFC 5322 message and base64url-encode it for the send endpoint.
pub fn compose_raw_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<String, ChannelError> {
    let email = lettre::Message::builder()
        .from(parse_address("from", from)?)
        .to(parse_address("to", to)?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| ChannelError::SendFailed {
            name: CHANNEL.into(),
            reason: format!("Failed to build email: {e}"),
        })?;

    Ok(URL_SAFE.encode(email.formatted()))
}
