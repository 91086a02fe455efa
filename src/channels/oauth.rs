//! Google OAuth plumbing for the Gmail mailbox.
//!
//! Built on `yup_oauth2`'s installed-app flow: the client-secrets file names
//! the OAuth client, tokens are cached on disk, expired tokens are refreshed
//! with the stored refresh token, and when no usable token exists the user is
//! sent through the consent page with a loopback redirect.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

use crate::error::AuthError;

const SERVICE: &str = "gmail";

/// Scopes requested by the consent flow.
pub const GMAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.modify",
];

/// How long a token request may wait on the user to finish consent.
pub const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

pub type GmailAuthenticator = DefaultAuthenticator;

/// Load the `installed` (or `web`) client registration.
///
/// `token_uri` overrides the token endpoint named in the file.
pub async fn load_client_secret(
    path: &Path,
    token_uri: Option<&str>,
) -> Result<ApplicationSecret, AuthError> {
    let mut secret = yup_oauth2::read_application_secret(path)
        .await
        .map_err(|e| AuthError::CredentialsUnavailable {
            service: SERVICE.into(),
            reason: format!("Cannot load client secrets from {}: {e}", path.display()),
        })?;
    if let Some(uri) = token_uri {
        secret.token_uri = uri.to_string();
    }
    Ok(secret)
}

/// Installed-app authenticator with tokens persisted to `token_file`.
pub async fn build_authenticator(
    secret: ApplicationSecret,
    token_file: &Path,
    delegate: Box<dyn InstalledFlowDelegate>,
) -> Result<GmailAuthenticator, AuthError> {
    InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
        .persist_tokens_to_disk(token_file)
        .flow_delegate(delegate)
        .build()
        .await
        .map_err(|e| AuthError::CredentialsUnavailable {
            service: SERVICE.into(),
            reason: format!("Cannot open token cache {}: {e}", token_file.display()),
        })
}

/// Fetch an access token for [`GMAIL_SCOPES`].
///
/// With `force_refresh` the cached access token is skipped and the refresh
/// token is exchanged again. If neither works, yup falls back to the consent
/// flow, which gives up after `deadline`.
pub async fn access_token(
    auth: &GmailAuthenticator,
    force_refresh: bool,
    deadline: Duration,
) -> Result<String, AuthError> {
    let request = async {
        if force_refresh {
            auth.force_refreshed_token(GMAIL_SCOPES).await
        } else {
            auth.token(GMAIL_SCOPES).await
        }
    };

    let token = tokio::time::timeout(deadline, request)
        .await
        .map_err(|_| AuthError::TokenExchange {
            service: SERVICE.into(),
            reason: format!("no token within {}s; consent not completed", deadline.as_secs()),
        })?
        .map_err(|e| AuthError::TokenExchange {
            service: SERVICE.into(),
            reason: e.to_string(),
        })?;

    debug!(force_refresh, "Obtained Gmail access token");
    token
        .token()
        .map(str::to_string)
        .ok_or_else(|| AuthError::TokenExchange {
            service: SERVICE.into(),
            reason: "token response carried no access token".into(),
        })
}

/// Prints the consent URL on the terminal and logs that the flow is waiting.
pub struct ConsentPrompt;

impl InstalledFlowDelegate for ConsentPrompt {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            info!("Waiting for Gmail consent on loopback redirect");
            println!("Open this URL in a browser to authorize Gmail access:\n\n{url}\n");
            Ok(String::new())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    const INSTALLED: &str = r#"{"installed":{
        "client_id":"cid.apps.googleusercontent.com",
        "client_secret":"shh",
        "auth_uri":"https://accounts.google.com/o/oauth2/auth",
        "token_uri":"https://oauth2.googleapis.com/token",
        "redirect_uris":["http://localhost"]
    }}"#;

    #[tokio::test]
    async fn installed_secret_keeps_its_token_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "credentials.json", INSTALLED);

        let secret = load_client_secret(&path, None).await.unwrap();
        assert_eq!(secret.client_id, "cid.apps.googleusercontent.com");
        assert_eq!(secret.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[tokio::test]
    async fn token_endpoint_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "credentials.json", INSTALLED);

        let secret = load_client_secret(&path, Some("http://127.0.0.1:9/token"))
            .await
            .unwrap();
        assert_eq!(secret.token_uri, "http://127.0.0.1:9/token");
    }

    #[tokio::test]
    async fn web_secret_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "web.json",
            &INSTALLED.replace("\"installed\"", "\"web\""),
        );
        assert_eq!(load_client_secret(&path, None).await.unwrap().client_secret, "shh");
    }

    #[tokio::test]
    async fn missing_or_foreign_secrets_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_client_secret(&dir.path().join("none.json"), None).await;
        assert!(matches!(missing, Err(AuthError::CredentialsUnavailable { .. })));

        let other = write(dir.path(), "other.json", r#"{"other":{}}"#);
        let foreign = load_client_secret(&other, None).await;
        assert!(matches!(foreign, Err(AuthError::CredentialsUnavailable { .. })));
    }

    #[tokio::test]
    async fn cached_token_without_expiry_needs_no_network() {
        let dir = tempfile::tempdir().unwrap();
        let secret = load_client_secret(&write(dir.path(), "c.json", INSTALLED), None)
            .await
            .unwrap();
        let cache = serde_json::json!([{
            "scopes": GMAIL_SCOPES,
            "token": {
                "access_token": "cached-access",
                "refresh_token": "cached-refresh",
                "expires_at": null,
                "id_token": null
            }
        }]);
        let token_file = write(dir.path(), "token.json", &cache.to_string());

        let auth = build_authenticator(secret, &token_file, Box::new(ConsentPrompt))
            .await
            .unwrap();
        let token = access_token(&auth, false, Duration::from_secs(5)).await.unwrap();
        assert_eq!(token, "cached-access");
    }

    #[tokio::test]
    async fn corrupt_token_cache_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let secret = load_client_secret(&write(dir.path(), "c.json", INSTALLED), None)
            .await
            .unwrap();
        let token_file = write(dir.path(), "token.json", "not json");

        let err = build_authenticator(secret, &token_file, Box::new(ConsentPrompt))
            .await
            .err()
            .expect("corrupt cache fails");
        assert!(matches!(err, AuthError::CredentialsUnavailable { .. }));
    }
}
