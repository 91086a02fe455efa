//! Shared service plumbing: authentication gate, retry wrapper and the
//! typed registry of remote collaborators.

pub mod auth;
pub mod retry;

pub use auth::{AUTH_TIMEOUT, AuthState, Authenticatable};
pub use retry::{RetryPolicy, execute_with_retry, is_auth_error};

use std::sync::Arc;

use crate::channels::{GmailMailbox, Mailbox};
use crate::config::AppConfig;
use crate::crm::{Crm, SalesforceClient};
use crate::error::Error;
use crate::llm::{TextGenerator, create_provider};

/// The remote collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Services {
    pub mailbox: Arc<dyn Mailbox>,
    pub generator: Arc<dyn TextGenerator>,
    pub crm: Arc<dyn Crm>,
}

impl Services {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        generator: Arc<dyn TextGenerator>,
        crm: Arc<dyn Crm>,
    ) -> Self {
        Self {
            mailbox,
            generator,
            crm,
        }
    }

    /// Construct the production clients. No network traffic happens here.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let mailbox = GmailMailbox::new(config.gmail.clone(), config.workflow.retry)?;
        let generator = create_provider(&config.llm)?;
        let crm = SalesforceClient::new(config.salesforce.clone())?;
        Ok(Self::new(Arc::new(mailbox), generator, Arc::new(crm)))
    }
}
