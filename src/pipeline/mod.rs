//! Inquiry processing pipeline.
//!
//! Every fetched message flows through:
//! 1. `ContactExtractor::extract_contact_info()`: LLM extraction with a
//!    sender-only fallback
//! 2. `ContactExtractor::generate_reply()`: confirmation or info request
//! 3. `Mailbox::send_reply()`: level 1
//! 4. `Crm::create_lead()`: level 2, complete records only

pub mod extractor;
pub mod types;
pub mod workflow;

pub use extractor::ContactExtractor;
pub use types::{
    ContactField, ContactRecord, EmailResult, ProcessedSet, ReplyDraft, StageOutcome, StageStatus,
};
pub use workflow::{HealthReport, ServiceStatus, WorkflowEngine, format_summary};
