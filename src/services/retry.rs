//! Bounded retry with linear backoff and lazy re-authentication.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::error::RetryError;
use crate::services::auth::Authenticatable;

/// Error text that suggests an expired or rejected credential.
static AUTH_ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)auth|token").unwrap_or_else(|_| unreachable!("static pattern is valid"))
});

/// Retry policy: attempt count and base delay for linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    /// Delay unit; attempt `n` waits `retry_delay * n` before the next try.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Backoff after the given (1-based) failed attempt. Saturates at `Duration::MAX`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

/// Whether an error message looks like an authentication problem.
pub fn is_auth_error(message: &str) -> bool {
    AUTH_ERROR_PATTERN.is_match(message)
}

/// Run `operation` until it succeeds or the policy's attempts are used up.
///
/// Failures whose text mentions "auth" or "token" force a re-authentication
/// of `service` before the next attempt. Exhaustion is logged and returned as
/// [`RetryError::Exhausted`]; callers treat it as "no result".
pub async fn execute_with_retry<S, T, E, F, Fut>(
    service: &S,
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError>
where
    S: Authenticatable + ?Sized,
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        debug!(operation = operation_name, attempt, attempts, "Executing");

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Succeeded after retry");
                } else {
                    debug!(operation = operation_name, "Succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                last_error = e.to_string();
                warn!(
                    operation = operation_name,
                    attempt,
                    attempts,
                    error = %last_error,
                    "Attempt failed"
                );

                if attempt < attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;

                    if is_auth_error(&last_error) {
                        info!(
                            service = service.service_name(),
                            "Re-authenticating after auth-related failure"
                        );
                        if let Err(auth_err) = service.reauthenticate().await {
                            warn!(
                                service = service.service_name(),
                                error = %auth_err,
                                "Re-authentication failed"
                            );
                        }
                    }
                }
            }
        }
    }

    error!(
        operation = operation_name,
        attempts,
        error = %last_error,
        "All retries exhausted"
    );
    Err(RetryError::Exhausted {
        operation: operation_name.to_string(),
        attempts,
        last_error,
    })
}
