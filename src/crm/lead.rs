//! Lead record derived from an extracted contact.

use serde::Serialize;

use crate::pipeline::types::ContactRecord;

pub const DEFAULT_LEAD_SOURCE: &str = "Email Inquiry";
pub const DEFAULT_LEAD_STATUS: &str = "Open - Not Contacted";
const LEAD_DESCRIPTION: &str = "Lead created by the automated email inquiry workflow";

/// Fixed metadata stamped on every lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadDefaults {
    pub lead_source: String,
    pub status: String,
}

impl Default for LeadDefaults {
    fn default() -> Self {
        Self {
            lead_source: DEFAULT_LEAD_SOURCE.to_string(),
            status: DEFAULT_LEAD_STATUS.to_string(),
        }
    }
}

/// Salesforce Lead sObject body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeadRecord {
    pub last_name: String,
    pub first_name: String,
    pub company: String,
    pub title: String,
    pub phone: String,
    pub email: String,
    pub lead_source: String,
    pub status: String,
    pub description: String,
}

/// Split a full name into `(last, first)`.
///
/// The first whitespace token is the last name; the remaining tokens joined
/// by single spaces form the first name. An absent or blank name gives
/// `("Unknown", "")`.
pub fn split_name(name: Option<&str>) -> (String, String) {
    let mut tokens = name.unwrap_or_default().split_whitespace();
    match tokens.next() {
        Some(last) => (last.to_string(), tokens.collect::<Vec<_>>().join(" ")),
        None => ("Unknown".to_string(), String::new()),
    }
}

impl LeadRecord {
    pub fn from_contact(contact: &ContactRecord, defaults: &LeadDefaults) -> Self {
        let (last_name, first_name) = split_name(contact.name());
        Self {
            last_name,
            first_name,
            company: contact.company().unwrap_or("Unknown").to_string(),
            title: contact.title().unwrap_or_default().to_string(),
            phone: contact.phone().unwrap_or_default().to_string(),
            email: contact.email().unwrap_or_default().to_string(),
            lead_source: defaults.lead_source.clone(),
            status: defaults.status.clone(),
            description: LEAD_DESCRIPTION.to_string(),
        }
    }
}
