//! Configuration types.
//!
//! Everything is read from the process environment (after `.env` loading in
//! `main`). Each loader takes a lookup function so tests can feed a fixed map
//! instead of mutating the real environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::channels::GmailConfig;
use crate::crm::SalesforceConfig;
use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::services::RetryPolicy;

/// Environment lookup used by every `from_lookup` constructor.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read a variable, treating blank values as unset.
pub(crate) fn env_string(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a variable, falling back to `default` when unset or unparseable.
pub(crate) fn env_parse<T: FromStr>(lookup: Lookup<'_>, key: &str, default: T) -> T {
    env_string(lookup, key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Deployment profile selecting workflow defaults and log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Profile {
    #[default]
    Development,
    Production,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Polling cadence and batch limits for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Sleep between monitor cycles.
    pub check_interval: Duration,
    /// Upper bound on messages fetched per cycle.
    pub max_emails_per_check: u32,
    /// How far back each fetch looks.
    pub lookback_minutes: u32,
    pub retry: RetryPolicy,
}

impl WorkflowSettings {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Development => Self {
                check_interval: Duration::from_secs(60),
                max_emails_per_check: 5,
                lookback_minutes: 5,
                retry: RetryPolicy::default(),
            },
            Profile::Production => Self {
                check_interval: Duration::from_secs(300),
                max_emails_per_check: 15,
                lookback_minutes: 15,
                retry: RetryPolicy::default(),
            },
        }
    }

    /// Profile defaults with environment overrides applied.
    pub fn from_lookup(profile: Profile, lookup: Lookup<'_>) -> Self {
        let defaults = Self::for_profile(profile);

        let check_interval = Duration::from_secs(env_parse(
            lookup,
            "EMAIL_CHECK_INTERVAL_SECS",
            defaults.check_interval.as_secs(),
        ));
        let max_emails_per_check =
            env_parse(lookup, "MAX_EMAILS_PER_CHECK", defaults.max_emails_per_check);
        let lookback_minutes =
            env_parse(lookup, "EMAIL_LOOKBACK_MINUTES", defaults.lookback_minutes);

        let retry = RetryPolicy::new(
            env_parse(lookup, "RETRY_ATTEMPTS", defaults.retry.max_retries),
            Duration::from_secs(env_parse(
                lookup,
                "RETRY_DELAY_SECS",
                defaults.retry.retry_delay.as_secs(),
            )),
        );

        Self {
            check_interval,
            max_emails_per_check,
            lookback_minutes,
            retry,
        }
    }
}

/// Log sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for the daily-rolling `workflow.log`.
    pub log_dir: PathBuf,
}

impl LoggingConfig {
    pub fn from_lookup(profile: Profile, lookup: Lookup<'_>) -> Self {
        let level = match profile {
            Profile::Development => "debug",
            Profile::Production => "info",
        };
        Self {
            level: level.to_string(),
            log_dir: env_string(lookup, "LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: Profile,
    pub workflow: WorkflowSettings,
    pub gmail: GmailConfig,
    pub llm: LlmConfig,
    pub salesforce: SalesforceConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env(profile: Profile) -> Result<Self, ConfigError> {
        Self::from_lookup(profile, &|key: &str| std::env::var(key).ok())
    }

    /// Build config from an arbitrary lookup. Fails only on a missing or
    /// malformed required value (the text-generation key or backend name).
    pub fn from_lookup(profile: Profile, lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            profile,
            workflow: WorkflowSettings::from_lookup(profile, lookup),
            gmail: GmailConfig::from_lookup(lookup),
            llm: LlmConfig::from_lookup(lookup)?,
            salesforce: SalesforceConfig::from_lookup(lookup),
            logging: LoggingConfig::from_lookup(profile, lookup),
        })
    }

    /// Non-fatal problems worth surfacing in a health check.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if !self.gmail.credentials_file.exists() {
            issues.push(format!(
                "Gmail credentials file not found: {}",
                self.gmail.credentials_file.display()
            ));
        }

        if self.salesforce.client_id.is_empty() {
            issues.push("SF_CLIENT_ID is not set".to_string());
        }
        if self.salesforce.username.is_empty() {
            issues.push("SF_USERNAME is not set".to_string());
        }
        match &self.salesforce.key_file {
            None => issues.push("SF_JWT_KEY is not set".to_string()),
            Some(path) if !path.exists() => {
                issues.push(format!("Salesforce key file not found: {}", path.display()));
            }
            Some(_) => {}
        }

        if self.workflow.max_emails_per_check == 0 {
            issues.push("MAX_EMAILS_PER_CHECK is 0; no mail will be fetched".to_string());
        }

        issues
    }
}
