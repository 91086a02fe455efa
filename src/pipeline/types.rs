//! Shared types for the inquiry processing pipeline.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

// ── Contact fields ──────────────────────────────────────────────────

/// A field the extractor tries to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactField {
    Name,
    Company,
    Title,
    Phone,
    Email,
}

impl ContactField {
    pub const ALL: [ContactField; 5] = [
        Self::Name,
        Self::Company,
        Self::Title,
        Self::Phone,
        Self::Email,
    ];

    /// JSON key used in the extraction payload.
    pub fn key(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Company => "company",
            Self::Title => "title",
            Self::Phone => "phone",
            Self::Email => "email",
        }
    }

    /// Human-readable label used when asking the sender for it.
    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "Full name",
            Self::Company => "Company / organization",
            Self::Title => "Job title",
            Self::Phone => "Phone number",
            Self::Email => "Email address",
        }
    }
}

/// Treat blank values and the literal string "null" as absent.
pub fn normalize_value(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

// ── Contact record ──────────────────────────────────────────────────

/// Structured contact details extracted from one inquiry.
///
/// `missing` is computed at construction, so `is_complete()` always agrees
/// with it. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    name: Option<String>,
    company: Option<String>,
    title: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    missing: BTreeSet<ContactField>,
}

impl ContactRecord {
    pub fn new(
        name: Option<String>,
        company: Option<String>,
        title: Option<String>,
        phone: Option<String>,
        email: Option<String>,
    ) -> Self {
        let mut record = Self {
            name: normalize_value(name),
            company: normalize_value(company),
            title: normalize_value(title),
            phone: normalize_value(phone),
            email: normalize_value(email),
            missing: BTreeSet::new(),
        };
        record.missing = ContactField::ALL
            .into_iter()
            .filter(|f| record.get(*f).is_none())
            .collect();
        record
    }

    /// Record used when extraction fails: only the sender's address is known.
    pub fn fallback(sender: &str) -> Self {
        Self::new(None, None, None, None, Some(sender.to_string()))
    }

    pub fn get(&self, field: ContactField) -> Option<&str> {
        match field {
            ContactField::Name => self.name.as_deref(),
            ContactField::Company => self.company.as_deref(),
            ContactField::Title => self.title.as_deref(),
            ContactField::Phone => self.phone.as_deref(),
            ContactField::Email => self.email.as_deref(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn company(&self) -> Option<&str> {
        self.company.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    /// Address replies go to.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn missing(&self) -> &BTreeSet<ContactField> {
        &self.missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

impl Serialize for ContactRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ContactRecord", 7)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("company", &self.company)?;
        s.serialize_field("title", &self.title)?;
        s.serialize_field("phone", &self.phone)?;
        s.serialize_field("email", &self.email)?;
        s.serialize_field("complete", &self.is_complete())?;
        s.serialize_field("missing", &self.missing)?;
        s.end()
    }
}

// ── Reply ───────────────────────────────────────────────────────────

/// Reply ready to send. Ephemeral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyDraft {
    pub subject: String,
    pub body: String,
}

// ── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

/// Status of one workflow level plus a short description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub detail: String,
}

impl StageOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Success,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            detail: detail.into(),
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            detail: detail.into(),
        }
    }
}

/// Outcome of processing one inquiry.
#[derive(Debug, Clone, Serialize)]
pub struct EmailResult {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub processed_at: DateTime<Utc>,
    pub contact: ContactRecord,
    /// Extraction, reply drafting and sending.
    pub level1: StageOutcome,
    /// Lead creation; skipped for incomplete records.
    pub level2: StageOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
}

// ── Processed set ───────────────────────────────────────────────────

/// Message ids already handled by this orchestrator instance.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    ids: HashSet<String>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn full_record_is_complete() {
        let record = ContactRecord::new(
            s("Hong Gildong"),
            s("Acme"),
            s("Manager"),
            s("010-1234-5678"),
            s("hong@acme.com"),
        );
        assert!(record.is_complete());
        assert!(record.missing().is_empty());
    }

    #[test]
    fn null_and_blank_values_count_as_missing() {
        let record = ContactRecord::new(s("null"), s("  "), None, s("NULL"), s("a@b.com"));
        assert!(!record.is_complete());
        assert_eq!(
            record.missing().iter().copied().collect::<Vec<_>>(),
            vec![
                ContactField::Name,
                ContactField::Company,
                ContactField::Title,
                ContactField::Phone
            ]
        );
        assert_eq!(record.name(), None);
    }

    #[test]
    fn fallback_keeps_only_sender() {
        let record = ContactRecord::fallback("lead@example.com");
        assert_eq!(record.email(), Some("lead@example.com"));
        assert_eq!(record.missing().len(), 4);
        assert!(!record.missing().contains(&ContactField::Email));
        assert!(!record.is_complete());
    }

    #[test]
    fn values_are_trimmed() {
        let record = ContactRecord::new(s("  Cher "), None, None, None, None);
        assert_eq!(record.name(), Some("Cher"));
        assert!(record.missing().contains(&ContactField::Email));
    }

    #[test]
    fn serialized_record_carries_completeness() {
        let record = ContactRecord::fallback("x@y.com");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["complete"], false);
        assert_eq!(json["email"], "x@y.com");
        assert_eq!(json["name"], serde_json::Value::Null);
        assert_eq!(
            json["missing"],
            serde_json::json!(["name", "company", "title", "phone"])
        );
    }

    #[test]
    fn stage_status_serializes_lowercase() {
        let json = serde_json::to_value(StageOutcome::skipped("incomplete")).unwrap();
        assert_eq!(json["status"], "skipped");
    }

    #[test]
    fn processed_set_rejects_duplicates() {
        let mut set = ProcessedSet::new();
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
        assert!(set.contains("a"));
        assert_eq!(set.len(), 1);
    }
}
