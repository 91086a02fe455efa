//! Salesforce REST client using the OAuth 2.0 JWT bearer flow.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{Lookup, env_string};
use crate::crm::Crm;
use crate::crm::lead::{DEFAULT_LEAD_SOURCE, DEFAULT_LEAD_STATUS, LeadDefaults, LeadRecord};
use crate::error::{AuthError, CrmError};
use crate::pipeline::types::ContactRecord;
use crate::services::{AuthState, Authenticatable};

const SERVICE: &str = "salesforce";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Assertion lifetime.
const ASSERTION_TTL_SECS: i64 = 180;

// ── Configuration ───────────────────────────────────────────────────

/// Salesforce connected-app configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SalesforceConfig {
    /// Connected-app consumer key (JWT `iss`).
    pub client_id: String,
    /// Integration user (JWT `sub`).
    pub username: String,
    /// Login host; also the JWT audience.
    pub login_url: String,
    /// PEM private key matching the connected app's certificate.
    pub key_file: Option<PathBuf>,
    pub api_version: String,
    pub lead_defaults: LeadDefaults,
}

impl SalesforceConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        Self {
            client_id: env_string(lookup, "SF_CLIENT_ID").unwrap_or_default(),
            username: env_string(lookup, "SF_USERNAME").unwrap_or_default(),
            login_url: env_string(lookup, "SF_LOGIN_URL")
                .unwrap_or_else(|| "https://login.salesforce.com".into())
                .trim_end_matches('/')
                .to_string(),
            key_file: env_string(lookup, "SF_JWT_KEY").map(PathBuf::from),
            api_version: env_string(lookup, "SF_API_VERSION")
                .map(|v| v.trim_start_matches('v').to_string())
                .unwrap_or_else(|| "60.0".into()),
            lead_defaults: LeadDefaults {
                lead_source: env_string(lookup, "SF_LEAD_SOURCE")
                    .unwrap_or_else(|| DEFAULT_LEAD_SOURCE.into()),
                status: env_string(lookup, "SF_LEAD_STATUS")
                    .unwrap_or_else(|| DEFAULT_LEAD_STATUS.into()),
            },
        }
    }
}

// ── JWT bearer flow ─────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BearerClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Sign the RS256 assertion exchanged for an access token.
pub(crate) fn build_assertion(
    config: &SalesforceConfig,
    private_key_pem: &[u8],
    now: i64,
) -> Result<String, AuthError> {
    let key = EncodingKey::from_rsa_pem(private_key_pem).map_err(|e| {
        AuthError::CredentialsUnavailable {
            service: SERVICE.into(),
            reason: format!("invalid RSA private key: {e}"),
        }
    })?;
    let claims = BearerClaims {
        iss: config.client_id.clone(),
        sub: config.username.clone(),
        aud: config.login_url.clone(),
        iat: now,
        exp: now + ASSERTION_TTL_SECS,
    };
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| {
        AuthError::TokenExchange {
            service: SERVICE.into(),
            reason: format!("failed to sign assertion: {e}"),
        }
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

struct SalesforceSession {
    access_token: SecretString,
    instance_url: String,
}

// ── Client ──────────────────────────────────────────────────────────

/// Salesforce CRM client.
pub struct SalesforceClient {
    config: SalesforceConfig,
    http: reqwest::Client,
    session: Mutex<Option<SalesforceSession>>,
    auth: AuthState,
}

impl SalesforceClient {
    pub fn new(config: SalesforceConfig) -> Result<Self, CrmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| CrmError::Http(e.to_string()))?;
        Ok(Self {
            config,
            http,
            session: Mutex::new(None),
            auth: AuthState::new(),
        })
    }

    /// `(access_token, instance_url)` of the current session.
    fn session(&self) -> Result<(SecretString, String), CrmError> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| (s.access_token.clone(), s.instance_url.clone()))
            .ok_or_else(|| {
                CrmError::Auth(AuthError::CredentialsUnavailable {
                    service: SERVICE.into(),
                    reason: "not authenticated".into(),
                })
            })
    }

    fn lead_url(&self, instance_url: &str) -> String {
        format!(
            "{}/services/data/v{}/sobjects/Lead/",
            instance_url.trim_end_matches('/'),
            self.config.api_version
        )
    }

    fn reject_unauthorized(&self, status: reqwest::StatusCode) {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.auth.invalidate();
        }
    }
}

#[async_trait]
impl Authenticatable for SalesforceClient {
    fn service_name(&self) -> &str {
        SERVICE
    }

    async fn authenticate(&self) -> Result<(), AuthError> {
        let key_file = self
            .config
            .key_file
            .as_ref()
            .ok_or_else(|| AuthError::CredentialsUnavailable {
                service: SERVICE.into(),
                reason: "SF_JWT_KEY is not set".into(),
            })?;
        let pem = std::fs::read(key_file).map_err(|e| AuthError::CredentialsUnavailable {
            service: SERVICE.into(),
            reason: format!("cannot read key file {}: {e}", key_file.display()),
        })?;

        let assertion = build_assertion(&self.config, &pem, Utc::now().timestamp())?;
        let token_url = format!("{}/services/oauth2/token", self.config.login_url);

        let response = self
            .http
            .post(&token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::Request {
                service: SERVICE.into(),
                reason: format!("token request failed: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AuthError::Request {
            service: SERVICE.into(),
            reason: format!("reading token response failed: {e}"),
        })?;
        if status != reqwest::StatusCode::OK {
            return Err(AuthError::TokenExchange {
                service: SERVICE.into(),
                reason: format!("status {status}: {body}"),
            });
        }
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::TokenExchange {
                service: SERVICE.into(),
                reason: format!("malformed token response: {e}"),
            })?;

        info!(instance_url = %token.instance_url, "Salesforce authenticated");
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(SalesforceSession {
            access_token: SecretString::from(token.access_token),
            instance_url: token.instance_url,
        });
        Ok(())
    }

    fn auth_state(&self) -> &AuthState {
        &self.auth
    }
}

#[async_trait]
impl Crm for SalesforceClient {
    async fn create_lead(&self, contact: &ContactRecord) -> Result<String, CrmError> {
        self.ensure_authenticated().await?;
        let (token, instance_url) = self.session()?;

        let lead = LeadRecord::from_contact(contact, &self.config.lead_defaults);
        info!(
            first_name = %lead.first_name,
            last_name = %lead.last_name,
            company = %lead.company,
            "Creating lead"
        );

        let response = self
            .http
            .post(self.lead_url(&instance_url))
            .bearer_auth(token.expose_secret())
            .json(&lead)
            .send()
            .await
            .map_err(|e| CrmError::Http(e.to_string()))?;

        let status = response.status();
        self.reject_unauthorized(status);
        let body = response
            .text()
            .await
            .map_err(|e| CrmError::Http(e.to_string()))?;
        if status != reqwest::StatusCode::CREATED {
            return Err(CrmError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreateResponse = serde_json::from_str(&body)
            .map_err(|e| CrmError::InvalidResponse(format!("missing lead id: {e}")))?;
        info!(
            lead_id = %created.id,
            url = %format!("{instance_url}/lightning/r/Lead/{}/view", created.id),
            "Lead created"
        );
        Ok(created.id)
    }

    async fn verify_lead(&self, lead_id: &str) -> Result<serde_json::Value, CrmError> {
        self.ensure_authenticated().await?;
        let (token, instance_url) = self.session()?;

        let response = self
            .http
            .get(format!("{}{lead_id}", self.lead_url(&instance_url)))
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| CrmError::Http(e.to_string()))?;

        let status = response.status();
        self.reject_unauthorized(status);
        let body = response
            .text()
            .await
            .map_err(|e| CrmError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(CrmError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| CrmError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SalesforceConfig {
        SalesforceConfig::from_lookup(&|key: &str| match key {
            "SF_CLIENT_ID" => Some("consumer-key".into()),
            "SF_USERNAME" => Some("integration@acme.com".into()),
            "SF_LOGIN_URL" => Some("https://test.salesforce.com/".into()),
            _ => None,
        })
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.login_url, "https://test.salesforce.com");
        assert_eq!(config.api_version, "60.0");
        assert_eq!(config.lead_defaults, LeadDefaults::default());
        assert!(config.key_file.is_none());
    }

    #[test]
    fn assertion_carries_bearer_claims() {
        let pem = include_bytes!("../../tests/fixtures/test_rsa_key.pem");
        let token = build_assertion(&config(), pem, 1_700_000_000).unwrap();

        let mut parts = token.split('.');
        let header = parts.next().unwrap();
        let payload = parts.next().unwrap();
        assert!(parts.next().is_some());

        use base64::Engine;
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header: serde_json::Value =
            serde_json::from_slice(&engine.decode(header).unwrap()).unwrap();
        let claims: BearerClaims = serde_json::from_slice(&engine.decode(payload).unwrap()).unwrap();

        assert_eq!(header["alg"], "RS256");
        assert_eq!(claims.iss, "consumer-key");
        assert_eq!(claims.sub, "integration@acme.com");
        assert_eq!(claims.aud, "https://test.salesforce.com");
        assert_eq!(claims.exp - claims.iat, 180);
    }

    #[test]
    fn garbage_key_is_rejected() {
        let err = build_assertion(&config(), b"not a key", 0).unwrap_err();
        assert!(matches!(err, AuthError::CredentialsUnavailable { .. }));
    }

    #[tokio::test]
    async fn missing_key_file_fails_closed() {
        let client = SalesforceClient::new(config()).unwrap();
        assert!(client.authenticate().await.is_err());
        assert!(client.ensure_authenticated().await.is_err());
        assert!(!client.is_authenticated());
    }

    #[test]
    fn lead_url_uses_api_version() {
        let client = SalesforceClient::new(config()).unwrap();
        assert_eq!(
            client.lead_url("https://acme.my.salesforce.com/"),
            "https://acme.my.salesforce.com/services/data/v60.0/sobjects/Lead/"
        );
    }
}
