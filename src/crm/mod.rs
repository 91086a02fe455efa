//! CRM integration: lead mapping and the Salesforce client.

pub mod lead;
pub mod salesforce;

pub use lead::{LeadDefaults, LeadRecord, split_name};
pub use salesforce::{SalesforceClient, SalesforceConfig};

use async_trait::async_trait;

use crate::error::CrmError;
use crate::pipeline::types::ContactRecord;
use crate::services::Authenticatable;

/// A CRM that accepts new leads.
#[async_trait]
pub trait Crm: Authenticatable {
    /// Create a lead from a contact record and return its id. No dedup.
    async fn create_lead(&self, contact: &ContactRecord) -> Result<String, CrmError>;

    /// Read a lead back. Diagnostic only.
    async fn verify_lead(&self, lead_id: &str) -> Result<serde_json::Value, CrmError>;
}
