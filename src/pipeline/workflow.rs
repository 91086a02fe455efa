//! Workflow orchestrator: fetches inquiries and drives the two-level flow.
//!
//! Flow per message:
//! 1. Level 1: extract contact → draft reply → send to the resolved address
//! 2. Level 2: create a CRM lead, only when the contact record is complete
//!
//! Messages are handled strictly one at a time in fetch order. A message id
//! is recorded as processed only after its result is complete.

use std::fmt;
use std::future::Future;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::channels::Message;
use crate::config::WorkflowSettings;
use crate::error::PipelineError;
use crate::pipeline::extractor::ContactExtractor;
use crate::pipeline::types::{EmailResult, ProcessedSet, StageOutcome, StageStatus};
use crate::services::{Authenticatable, Services};

/// Lookback used by the health check's test fetch.
const HEALTH_LOOKBACK_MINUTES: u32 = 60;
const HEALTH_MAX_RESULTS: u32 = 5;

async fn authenticate_service<S: Authenticatable + ?Sized>(service: &S) -> bool {
    match service.ensure_authenticated().await {
        Ok(()) => true,
        Err(e) => {
            warn!(service = service.service_name(), error = %e, "Service unavailable");
            false
        }
    }
}

/// Inquiry-to-lead workflow engine.
pub struct WorkflowEngine {
    settings: WorkflowSettings,
    services: Services,
    extractor: ContactExtractor,
    processed: ProcessedSet,
    check_count: u64,
}

impl WorkflowEngine {
    pub fn new(settings: WorkflowSettings, services: Services) -> Self {
        let extractor = ContactExtractor::new(services.generator.clone());
        Self {
            settings,
            services,
            extractor,
            processed: ProcessedSet::new(),
            check_count: 0,
        }
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    /// Authenticate every service. Succeeds if at least one of them did.
    pub async fn initialize(&self) -> Result<(), PipelineError> {
        info!("Initializing workflow engine");

        let results = [
            authenticate_service(&*self.services.mailbox).await,
            authenticate_service(&*self.services.generator).await,
            authenticate_service(&*self.services.crm).await,
        ];
        let ready = results.iter().filter(|ok| **ok).count();

        if ready == 0 {
            error!("Workflow engine initialization failed: no service authenticated");
            return Err(PipelineError::InitializationFailed);
        }
        info!(ready, total = results.len(), "Workflow engine initialized");
        Ok(())
    }

    fn service_statuses(&self) -> Vec<ServiceStatus> {
        vec![
            ServiceStatus::of(&*self.services.mailbox),
            ServiceStatus::of(&*self.services.generator),
            ServiceStatus::of(&*self.services.crm),
        ]
    }

    /// Fetch and process messages not yet seen by this engine.
    ///
    /// Failed messages are logged and left unrecorded so a later pass can
    /// pick them up again. A failed fetch yields no results.
    pub async fn process_new_emails(
        &mut self,
        lookback_minutes: Option<u32>,
        max_emails: Option<u32>,
    ) -> Vec<EmailResult> {
        let lookback = lookback_minutes.unwrap_or(self.settings.lookback_minutes);
        let max = max_emails.unwrap_or(self.settings.max_emails_per_check);

        let degraded: Vec<String> = self
            .service_statuses()
            .into_iter()
            .filter(|s| !s.authenticated)
            .map(|s| s.name)
            .collect();
        if !degraded.is_empty() {
            warn!(services = ?degraded, "Some services are not authenticated");
        }

        let fetched = match self
            .services
            .mailbox
            .get_recent_messages(lookback, max)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %PipelineError::ChannelFetch(e.to_string()), "Fetch failed");
                return Vec::new();
            }
        };

        let fresh: Vec<Message> = fetched
            .into_iter()
            .filter(|m| !self.processed.contains(&m.id))
            .collect();
        if fresh.is_empty() {
            info!("No new emails to process");
            return Vec::new();
        }

        let total = fresh.len();
        info!(count = total, "Processing new emails");

        let mut results = Vec::with_capacity(total);
        for (i, message) in fresh.iter().enumerate() {
            debug!(index = i + 1, total, id = %message.id, "Processing email");
            match self.process_single_email(message).await {
                Ok(result) => {
                    self.processed.insert(message.id.clone());
                    results.push(result);
                }
                Err(e) => {
                    error!(id = %message.id, error = %e, "Failed to process email");
                }
            }
        }

        info!(processed = results.len(), total, "Email batch complete");
        results
    }

    /// Run both workflow levels for one message. Does not consult or update
    /// the processed set.
    pub async fn process_single_email(
        &self,
        message: &Message,
    ) -> Result<EmailResult, PipelineError> {
        info!(
            id = %message.id,
            sender = %message.sender,
            subject = %message.subject,
            "Processing inquiry"
        );

        // Level 1: extract, draft, send
        let contact = self
            .extractor
            .extract_contact_info(&message.body, &message.sender)
            .await;

        let recipient = contact
            .email()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::NoRecipient {
                message_id: message.id.clone(),
            })?;

        let reply = self.extractor.generate_reply(&contact, &message.subject).await;
        debug!(subject = %reply.subject, "Reply drafted");

        let level1 = match self
            .services
            .mailbox
            .send_reply(&recipient, &reply.subject, &reply.body, &message.id)
            .await
        {
            Ok(()) => {
                info!(id = %message.id, to = %recipient, "Level 1 complete: reply sent");
                StageOutcome::success(format!("Reply sent to {recipient}"))
            }
            Err(e) => {
                error!(id = %message.id, error = %e, "Level 1 failed: reply not sent");
                StageOutcome::failed(format!("Reply not sent: {e}"))
            }
        };

        // Level 2: lead creation for complete records only
        let mut lead_id = None;
        let level2 = if contact.is_complete() {
            match self.services.crm.create_lead(&contact).await {
                Ok(id) => {
                    info!(id = %message.id, lead_id = %id, "Level 2 complete: lead created");
                    let outcome = StageOutcome::success(format!("Lead {id} created"));
                    lead_id = Some(id);
                    outcome
                }
                Err(e) => {
                    error!(id = %message.id, error = %e, "Level 2 failed: lead not created");
                    StageOutcome::failed(format!("Lead not created: {e}"))
                }
            }
        } else {
            let missing: Vec<&str> = contact.missing().iter().map(|f| f.key()).collect();
            info!(id = %message.id, missing = ?missing, "Level 2 skipped: incomplete contact");
            StageOutcome::skipped(format!("Missing fields: {}", missing.join(", ")))
        };

        Ok(EmailResult {
            message_id: message.id.clone(),
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            processed_at: Utc::now(),
            contact,
            level1,
            level2,
            lead_id,
        })
    }

    /// Initialize, run one pass, return its results.
    pub async fn run_single(&mut self) -> Result<Vec<EmailResult>, PipelineError> {
        info!("Single-run mode");
        self.initialize().await?;
        let results = self.process_new_emails(None, None).await;
        info!(processed = results.len(), "Single run complete");
        Ok(results)
    }

    /// Poll until Ctrl-C.
    pub async fn run_monitor(&mut self) -> Result<(), PipelineError> {
        self.run_monitor_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Cannot listen for Ctrl-C; monitor will run until killed");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Poll until `shutdown` resolves. The shutdown future is raced against
    /// both the poll and the inter-poll sleep.
    pub async fn run_monitor_until<F>(&mut self, shutdown: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()>,
    {
        self.initialize().await?;

        let interval = self.settings.check_interval;
        info!(interval_secs = interval.as_secs(), "Monitor mode started; Ctrl-C to stop");
        tokio::pin!(shutdown);

        loop {
            self.check_count += 1;
            info!(check = self.check_count, "Checking for new emails");

            let results = tokio::select! {
                _ = &mut shutdown => break,
                results = self.process_new_emails(None, None) => results,
            };

            if results.is_empty() {
                info!(check = self.check_count, "No new emails");
            } else {
                info!(check = self.check_count, processed = results.len(), "Emails processed");
            }
            info!(next_check_secs = interval.as_secs(), "Sleeping until next check");

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(checks = self.check_count, "Monitor stopped");
        Ok(())
    }

    /// Read-only diagnostic: config issues, service auth, one bounded fetch.
    pub async fn health_check(&self, config_issues: Vec<String>) -> HealthReport {
        info!("Running health check");
        let initialized = self.initialize().await.is_ok();
        let services = self.service_statuses();

        let fetch = self
            .services
            .mailbox
            .get_recent_messages(HEALTH_LOOKBACK_MINUTES, HEALTH_MAX_RESULTS)
            .await
            .map(|messages| messages.len())
            .map_err(|e| e.to_string());

        HealthReport {
            config_issues,
            initialized,
            services,
            fetch,
        }
    }
}

// ── Reporting ───────────────────────────────────────────────────────

/// Authentication status of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub authenticated: bool,
}

impl ServiceStatus {
    fn of<S: Authenticatable + ?Sized>(service: &S) -> Self {
        Self {
            name: service.service_name().to_string(),
            authenticated: service.is_authenticated(),
        }
    }
}

/// Health check outcome.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub config_issues: Vec<String>,
    pub initialized: bool,
    pub services: Vec<ServiceStatus>,
    /// Number of messages from the test fetch, or the error text.
    pub fetch: Result<usize, String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.config_issues.is_empty()
            && self.initialized
            && self.services.iter().all(|s| s.authenticated)
            && self.fetch.is_ok()
    }
}

fn mark(ok: bool) -> &'static str {
    if ok { "OK  " } else { "FAIL" }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "System health")?;
        writeln!(f, "=============")?;

        writeln!(f, "\n1. Configuration")?;
        if self.config_issues.is_empty() {
            writeln!(f, "   [{}] configuration valid", mark(true))?;
        }
        for issue in &self.config_issues {
            writeln!(f, "   [{}] {issue}", mark(false))?;
        }

        writeln!(f, "\n2. Services")?;
        writeln!(f, "   [{}] initialization", mark(self.initialized))?;
        for service in &self.services {
            writeln!(f, "   [{}] {}", mark(service.authenticated), service.name)?;
        }

        writeln!(f, "\n3. Mailbox test fetch (last {HEALTH_LOOKBACK_MINUTES} minutes)")?;
        match &self.fetch {
            Ok(count) => writeln!(f, "   [{}] {count} message(s)", mark(true)),
            Err(e) => writeln!(f, "   [{}] {e}", mark(false)),
        }
    }
}

fn status_label(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Success => "success",
        StageStatus::Failed => "failed",
        StageStatus::Skipped => "skipped",
    }
}

/// Human-readable summary of a pass.
pub fn format_summary(results: &[EmailResult]) -> String {
    if results.is_empty() {
        return "No new emails processed.\n".to_string();
    }

    let mut out = format!("Processed {} email(s)\n", results.len());
    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!(
            "\n[{}] {} <{}>\n    reply: {} ({})\n    lead:  {} ({})\n",
            i + 1,
            r.subject,
            r.sender,
            status_label(r.level1.status),
            r.level1.detail,
            status_label(r.level2.status),
            r.level2.detail,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::channels::Mailbox;
    use crate::config::Profile;
    use crate::crm::Crm;
    use crate::error::{AuthError, ChannelError, CrmError, LlmError};
    use crate::llm::{GenerationRequest, TextGenerator};
    use crate::pipeline::types::ContactRecord;
    use crate::services::AuthState;

    const COMPLETE_JSON: &str = r#"{"name": "Hong Gildong", "company": "Acme", "title": "CTO", "phone": "010-1234-5678", "email": null}"#;
    const PARTIAL_JSON: &str = r#"{"name": "Kim", "company": null, "title": null, "phone": null, "email": null}"#;

    fn auth_failure(service: &str) -> AuthError {
        AuthError::CredentialsUnavailable {
            service: service.into(),
            reason: "test".into(),
        }
    }

    // ── Mocks ───────────────────────────────────────────────────────

    struct MockMailbox {
        messages: Vec<Message>,
        fetch_fails: bool,
        send_fails: bool,
        auth_ok: bool,
        fetches: AtomicUsize,
        sent: Mutex<Vec<(String, String, String)>>,
        auth: AuthState,
    }

    impl MockMailbox {
        fn with_messages(messages: Vec<Message>) -> Self {
            Self {
                messages,
                fetch_fails: false,
                send_fails: false,
                auth_ok: true,
                fetches: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
                auth: AuthState::new(),
            }
        }

        fn sent(&self) -> Vec<(String, String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Authenticatable for MockMailbox {
        fn service_name(&self) -> &str {
            "mock-mailbox"
        }

        async fn authenticate(&self) -> Result<(), AuthError> {
            if self.auth_ok {
                Ok(())
            } else {
                Err(auth_failure("mock-mailbox"))
            }
        }

        fn auth_state(&self) -> &AuthState {
            &self.auth
        }
    }

    #[async_trait]
    impl Mailbox for MockMailbox {
        async fn get_recent_messages(
            &self,
            _lookback_minutes: u32,
            max_results: u32,
        ) -> Result<Vec<Message>, ChannelError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fetch_fails {
                return Err(ChannelError::Http("connection refused".into()));
            }
            Ok(self
                .messages
                .iter()
                .take(max_results as usize)
                .cloned()
                .collect())
        }

        async fn send_reply(
            &self,
            to: &str,
            subject: &str,
            _body: &str,
            original_message_id: &str,
        ) -> Result<(), ChannelError> {
            if self.send_fails {
                return Err(ChannelError::SendFailed {
                    name: "mock".into(),
                    reason: "quota exceeded".into(),
                });
            }
            self.sent.lock().unwrap().push((
                to.to_string(),
                subject.to_string(),
                original_message_id.to_string(),
            ));
            Ok(())
        }
    }

    /// Answers extraction requests (low temperature) with a fixed payload
    /// and reply requests with fixed text.
    struct MockGenerator {
        extraction: Result<String, ()>,
        auth: AuthState,
    }

    impl MockGenerator {
        fn returning(extraction: &str) -> Self {
            Self {
                extraction: Ok(extraction.to_string()),
                auth: AuthState::new(),
            }
        }

        fn timing_out() -> Self {
            Self {
                extraction: Err(()),
                auth: AuthState::new(),
            }
        }
    }

    #[async_trait]
    impl Authenticatable for MockGenerator {
        fn service_name(&self) -> &str {
            "mock-generator"
        }

        async fn authenticate(&self) -> Result<(), AuthError> {
            Ok(())
        }

        fn auth_state(&self) -> &AuthState {
            &self.auth
        }
    }

    #[async_trait]
    impl TextGenerator for MockGenerator {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn generate_text(&self, request: GenerationRequest) -> Result<String, LlmError> {
            if request.temperature >= 0.5 {
                return Ok("Thank you for your inquiry.".into());
            }
            self.extraction.clone().map_err(|()| LlmError::Timeout {
                provider: "mock".into(),
                timeout: Duration::from_secs(60),
            })
        }
    }

    struct MockCrm {
        fail: bool,
        auth_ok: bool,
        created: Mutex<Vec<ContactRecord>>,
        auth: AuthState,
    }

    impl MockCrm {
        fn new() -> Self {
            Self {
                fail: false,
                auth_ok: true,
                created: Mutex::new(Vec::new()),
                auth: AuthState::new(),
            }
        }

        fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Authenticatable for MockCrm {
        fn service_name(&self) -> &str {
            "mock-crm"
        }

        async fn authenticate(&self) -> Result<(), AuthError> {
            if self.auth_ok {
                Ok(())
            } else {
                Err(auth_failure("mock-crm"))
            }
        }

        fn auth_state(&self) -> &AuthState {
            &self.auth
        }
    }

    #[async_trait]
    impl Crm for MockCrm {
        async fn create_lead(&self, contact: &ContactRecord) -> Result<String, CrmError> {
            if self.fail {
                return Err(CrmError::RequestFailed {
                    status: 400,
                    body: "REQUIRED_FIELD_MISSING".into(),
                });
            }
            let mut created = self.created.lock().unwrap();
            created.push(contact.clone());
            Ok(format!("00Q{:03}", created.len()))
        }

        async fn verify_lead(&self, lead_id: &str) -> Result<serde_json::Value, CrmError> {
            Ok(serde_json::json!({ "Id": lead_id }))
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn message(id: &str, sender: &str) -> Message {
        Message {
            id: id.into(),
            sender: sender.into(),
            subject: "Product inquiry".into(),
            body: "Hello, I'd like a quote.".into(),
        }
    }

    struct Harness {
        mailbox: Arc<MockMailbox>,
        crm: Arc<MockCrm>,
        engine: WorkflowEngine,
    }

    fn harness(mailbox: MockMailbox, generator: MockGenerator, crm: MockCrm) -> Harness {
        let mailbox = Arc::new(mailbox);
        let crm = Arc::new(crm);
        let services = Services::new(mailbox.clone(), Arc::new(generator), crm.clone());
        Harness {
            mailbox,
            crm,
            engine: WorkflowEngine::new(
                WorkflowSettings::for_profile(Profile::Development),
                services,
            ),
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn already_processed_ids_are_excluded() {
        let mut h = harness(
            MockMailbox::with_messages(vec![
                message("m1", "a@x.com"),
                message("m2", "b@x.com"),
                message("m3", "c@x.com"),
            ]),
            MockGenerator::returning(COMPLETE_JSON),
            MockCrm::new(),
        );
        h.engine.processed.insert("m2");

        let results = h.engine.process_new_emails(None, None).await;

        let ids: Vec<&str> = results.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
        assert_eq!(h.engine.processed().len(), 3);

        // Second pass finds nothing new.
        assert!(h.engine.process_new_emails(None, None).await.is_empty());
        assert_eq!(h.mailbox.sent().len(), 2);
    }

    #[tokio::test]
    async fn complete_record_creates_lead() {
        let h = harness(
            MockMailbox::with_messages(vec![]),
            MockGenerator::returning(COMPLETE_JSON),
            MockCrm::new(),
        );

        let result = h
            .engine
            .process_single_email(&message("m1", "hong@acme.com"))
            .await
            .unwrap();

        assert!(result.contact.is_complete());
        assert_eq!(result.contact.email(), Some("hong@acme.com"));
        assert_eq!(result.level1.status, StageStatus::Success);
        assert_eq!(result.level2.status, StageStatus::Success);
        assert_eq!(result.lead_id.as_deref(), Some("00Q001"));

        let sent = h.mailbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "hong@acme.com");
        assert_eq!(sent[0].1, "Re: Product inquiry - assigned");
        assert_eq!(sent[0].2, "m1");
    }

    #[tokio::test]
    async fn incomplete_record_skips_lead() {
        let h = harness(
            MockMailbox::with_messages(vec![]),
            MockGenerator::returning(PARTIAL_JSON),
            MockCrm::new(),
        );

        let result = h
            .engine
            .process_single_email(&message("m1", "kim@x.com"))
            .await
            .unwrap();

        assert_eq!(result.level1.status, StageStatus::Success);
        assert_eq!(result.level2.status, StageStatus::Skipped);
        assert!(result.level2.detail.contains("company"));
        assert_eq!(h.crm.created_count(), 0);
        assert_eq!(h.mailbox.sent()[0].1, "Re: Product inquiry - info requested");
    }

    #[tokio::test]
    async fn extraction_timeout_falls_back_and_skips_lead() {
        let h = harness(
            MockMailbox::with_messages(vec![]),
            MockGenerator::timing_out(),
            MockCrm::new(),
        );

        let result = h
            .engine
            .process_single_email(&message("m1", "lead@example.com"))
            .await
            .unwrap();

        assert_eq!(result.contact, ContactRecord::fallback("lead@example.com"));
        assert_eq!(result.level1.status, StageStatus::Success);
        assert_eq!(result.level2.status, StageStatus::Skipped);
        assert_eq!(h.mailbox.sent()[0].0, "lead@example.com");
        assert_eq!(h.crm.created_count(), 0);
    }

    #[tokio::test]
    async fn send_failure_marks_level1_failed_but_still_records() {
        let mut mailbox = MockMailbox::with_messages(vec![message("m1", "hong@acme.com")]);
        mailbox.send_fails = true;
        let mut h = harness(mailbox, MockGenerator::returning(COMPLETE_JSON), MockCrm::new());

        let results = h.engine.process_new_emails(None, None).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].level1.status, StageStatus::Failed);
        // Lead creation depends only on completeness.
        assert_eq!(results[0].level2.status, StageStatus::Success);
        assert!(h.engine.processed().contains("m1"));
    }

    #[tokio::test]
    async fn crm_failure_marks_level2_failed() {
        let mut crm = MockCrm::new();
        crm.fail = true;
        let h = harness(
            MockMailbox::with_messages(vec![]),
            MockGenerator::returning(COMPLETE_JSON),
            crm,
        );

        let result = h
            .engine
            .process_single_email(&message("m1", "hong@acme.com"))
            .await
            .unwrap();
        assert_eq!(result.level2.status, StageStatus::Failed);
        assert!(result.lead_id.is_none());
    }

    #[tokio::test]
    async fn process_single_email_does_not_dedup() {
        let h = harness(
            MockMailbox::with_messages(vec![]),
            MockGenerator::returning(COMPLETE_JSON),
            MockCrm::new(),
        );
        let msg = message("m1", "hong@acme.com");

        h.engine.process_single_email(&msg).await.unwrap();
        h.engine.process_single_email(&msg).await.unwrap();

        assert_eq!(h.crm.created_count(), 2);
        assert_eq!(h.mailbox.sent().len(), 2);
        assert!(h.engine.processed().is_empty());
    }

    #[tokio::test]
    async fn message_without_reply_address_is_not_recorded() {
        let mut h = harness(
            MockMailbox::with_messages(vec![message("m1", ""), message("m2", "ok@x.com")]),
            MockGenerator::timing_out(),
            MockCrm::new(),
        );

        let results = h.engine.process_new_emails(None, None).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message_id, "m2");
        assert!(!h.engine.processed().contains("m1"));
        assert!(h.engine.processed().contains("m2"));
    }

    #[tokio::test]
    async fn failed_fetch_yields_empty_results() {
        let mut mailbox = MockMailbox::with_messages(vec![message("m1", "a@x.com")]);
        mailbox.fetch_fails = true;
        let mut h = harness(mailbox, MockGenerator::returning(COMPLETE_JSON), MockCrm::new());

        assert!(h.engine.process_new_emails(None, None).await.is_empty());
        assert!(h.engine.processed().is_empty());
    }

    #[tokio::test]
    async fn max_emails_override_limits_fetch() {
        let mut h = harness(
            MockMailbox::with_messages(vec![
                message("m1", "a@x.com"),
                message("m2", "b@x.com"),
                message("m3", "c@x.com"),
            ]),
            MockGenerator::returning(PARTIAL_JSON),
            MockCrm::new(),
        );

        let results = h.engine.process_new_emails(Some(10), Some(1)).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn initialize_succeeds_with_one_service() {
        let mut mailbox = MockMailbox::with_messages(vec![]);
        mailbox.auth_ok = false;
        let mut crm = MockCrm::new();
        crm.auth_ok = false;
        let h = harness(mailbox, MockGenerator::returning("{}"), crm);

        assert!(h.engine.initialize().await.is_ok());
        let statuses = h.engine.service_statuses();
        assert_eq!(
            statuses.iter().filter(|s| s.authenticated).count(),
            1,
            "{statuses:?}"
        );
    }

    #[tokio::test]
    async fn run_single_processes_one_pass() {
        let mut h = harness(
            MockMailbox::with_messages(vec![message("m1", "a@x.com")]),
            MockGenerator::returning(PARTIAL_JSON),
            MockCrm::new(),
        );

        let results = h.engine.run_single().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(h.mailbox.fetches.load(Ordering::SeqCst), 1);
        assert!(format_summary(&results).contains("Processed 1 email(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_polls_until_shutdown() {
        let mut h = harness(
            MockMailbox::with_messages(vec![message("m1", "a@x.com")]),
            MockGenerator::returning(PARTIAL_JSON),
            MockCrm::new(),
        );

        // Interval is 60s: checks at t=0 and t=60, shutdown during the second sleep.
        h.engine
            .run_monitor_until(tokio::time::sleep(Duration::from_secs(90)))
            .await
            .unwrap();

        assert_eq!(h.mailbox.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(h.engine.check_count, 2);
        // The message was handled once despite two fetches.
        assert_eq!(h.mailbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn health_check_reports_without_processing() {
        let mut crm = MockCrm::new();
        crm.auth_ok = false;
        let h = harness(
            MockMailbox::with_messages(vec![message("m1", "a@x.com"), message("m2", "b@x.com")]),
            MockGenerator::returning(COMPLETE_JSON),
            crm,
        );

        let report = h.engine.health_check(vec!["SF_JWT_KEY is not set".into()]).await;

        assert!(report.initialized);
        assert_eq!(report.fetch, Ok(2));
        assert!(!report.is_healthy());
        assert!(h.engine.processed().is_empty());
        assert!(h.mailbox.sent().is_empty());

        let text = report.to_string();
        assert!(text.contains("SF_JWT_KEY is not set"));
        assert!(text.contains("[FAIL] mock-crm"));
        assert!(text.contains("2 message(s)"));
    }
}
