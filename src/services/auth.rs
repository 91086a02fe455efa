//! Shared authentication capability for every remote client.
//!
//! Each client tracks when it last authenticated successfully. The
//! `ensure_authenticated` gate only re-runs the handshake once that
//! timestamp is older than the auth timeout (1 hour by default).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::AuthError;

/// Default lifetime of a successful authentication.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(3600);

/// Last-successful-auth bookkeeping for one client.
#[derive(Debug)]
pub struct AuthState {
    last_success: Mutex<Option<Instant>>,
    timeout: Duration,
}

impl AuthState {
    pub fn new() -> Self {
        Self::with_timeout(AUTH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            last_success: Mutex::new(None),
            timeout,
        }
    }

    /// True when an authentication succeeded within the timeout.
    pub fn is_fresh(&self) -> bool {
        self.last_success
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some_and(|at| at.elapsed() <= self.timeout)
    }

    pub fn mark_authenticated(&self) {
        *self.last_success.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    /// Forget the last success so the next gate check re-authenticates.
    pub fn invalidate(&self) {
        *self.last_success.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

/// A client that needs a credential handshake before it can be used.
#[async_trait]
pub trait Authenticatable: Send + Sync {
    /// Name used in logs and health reports.
    fn service_name(&self) -> &str;

    /// Perform the handshake. Implementations fail closed.
    async fn authenticate(&self) -> Result<(), AuthError>;

    fn auth_state(&self) -> &AuthState;

    fn is_authenticated(&self) -> bool {
        self.auth_state().is_fresh()
    }

    /// Authenticate only if the last success is missing or stale.
    async fn ensure_authenticated(&self) -> Result<(), AuthError> {
        if self.auth_state().is_fresh() {
            return Ok(());
        }

        info!(service = self.service_name(), "Authenticating");
        match self.authenticate().await {
            Ok(()) => {
                self.auth_state().mark_authenticated();
                info!(service = self.service_name(), "Authentication succeeded");
                Ok(())
            }
            Err(e) => {
                error!(service = self.service_name(), error = %e, "Authentication failed");
                Err(e)
            }
        }
    }

    /// Force a fresh handshake regardless of the last success.
    async fn reauthenticate(&self) -> Result<(), AuthError> {
        self.auth_state().invalidate();
        self.ensure_authenticated().await
    }
}
