//! Contact extraction and reply drafting.
//!
//! Two generation calls per inquiry:
//! 1. Extraction: message body → JSON with name/company/title/phone/email.
//! 2. Reply: a confirmation (complete record) or a request for the missing
//!    fields (incomplete record).
//!
//! Neither call is allowed to fail the pipeline. Extraction degrades to
//! [`ContactRecord::fallback`], drafting to a generic acknowledgment.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::strip_quoted_text;
use crate::llm::{GenerationRequest, TextGenerator};
use crate::pipeline::types::{ContactField, ContactRecord, ReplyDraft, normalize_value};

/// Low temperature keeps extraction close to the text.
const EXTRACTION_TEMPERATURE: f32 = 0.3;

const REPLY_TEMPERATURE: f32 = 0.7;

/// Body characters sent to the model.
const MAX_BODY_CHARS: usize = 6000;

const FALLBACK_REPLY_BODY: &str = "Thank you for contacting us. We have received your inquiry \
and will get back to you as soon as possible.";

/// Contact extractor and reply generator over one text-generation backend.
pub struct ContactExtractor {
    generator: Arc<dyn TextGenerator>,
}

impl ContactExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Extract contact details from an inquiry body.
    ///
    /// Never fails: transport errors, unparseable output and non-object
    /// payloads all yield the fallback record for `sender`.
    pub async fn extract_contact_info(&self, email_body: &str, sender: &str) -> ContactRecord {
        let prompt = build_extraction_prompt(email_body, sender);
        let request = GenerationRequest::new(prompt).with_temperature(EXTRACTION_TEMPERATURE);

        let raw = match self.generator.generate_text(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(sender, error = %e, "Extraction call failed, using fallback record");
                return ContactRecord::fallback(sender);
            }
        };

        match parse_contact_response(&raw, sender) {
            Some(record) => {
                info!(
                    sender,
                    complete = record.is_complete(),
                    missing = ?record.missing(),
                    "Extracted contact info"
                );
                record
            }
            None => {
                warn!(sender, raw_response = %raw, "Unparseable extraction output, using fallback record");
                ContactRecord::fallback(sender)
            }
        }
    }

    /// Draft a reply for the extracted record.
    pub async fn generate_reply(&self, contact: &ContactRecord, original_subject: &str) -> ReplyDraft {
        let (prompt, subject) = if contact.is_complete() {
            (
                build_confirmation_prompt(contact, original_subject),
                format!("Re: {original_subject} - assigned"),
            )
        } else {
            (
                build_info_request_prompt(contact, original_subject),
                format!("Re: {original_subject} - info requested"),
            )
        };

        let request = GenerationRequest::new(prompt).with_temperature(REPLY_TEMPERATURE);
        match self.generator.generate_text(request).await {
            Ok(body) if !body.trim().is_empty() => {
                debug!(subject = %subject, "Drafted reply");
                ReplyDraft {
                    subject,
                    body: body.trim().to_string(),
                }
            }
            Ok(_) => {
                warn!("Reply generation returned empty text, using generic acknowledgment");
                fallback_reply(original_subject)
            }
            Err(e) => {
                warn!(error = %e, "Reply generation failed, using generic acknowledgment");
                fallback_reply(original_subject)
            }
        }
    }
}

fn fallback_reply(original_subject: &str) -> ReplyDraft {
    ReplyDraft {
        subject: format!("Re: {original_subject}"),
        body: FALLBACK_REPLY_BODY.to_string(),
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_extraction_prompt(email_body: &str, sender: &str) -> String {
    let newest = strip_quoted_text(email_body);
    let content: String = newest.chars().take(MAX_BODY_CHARS).collect();

    format!(
        "Analyze the following email and extract the sender's contact information.\n\
         The content may include replies, forwarded text or signatures. Ignore quoted text \
         and earlier messages in the thread; use only the most recent message.\n\n\
         Email content:\n---\n{content}\n---\n\n\
         Sender's email: {sender}\n\n\
         Extract these fields:\n\
         1. name: full name of the person\n\
         2. company: company or organization name\n\
         3. title: job title\n\
         4. phone: contact phone number\n\
         5. email: contact email address (use the sender's email if none appears in the body)\n\n\
         If a field is not present, use null. Respond ONLY with a JSON object:\n\
         {{\"name\": \"...\", \"company\": \"...\", \"title\": \"...\", \"phone\": \"...\", \"email\": \"...\"}}"
    )
}

fn build_confirmation_prompt(contact: &ContactRecord, original_subject: &str) -> String {
    let mut details = String::new();
    for field in ContactField::ALL {
        details.push_str(&format!(
            "- {}: {}\n",
            field.label(),
            contact.get(field).unwrap_or_default()
        ));
    }

    format!(
        "A customer sent an inquiry with the following details:\n{details}\n\
         Original subject: {original_subject}\n\n\
         Write a polite reply email that:\n\
         1. Thanks them for the inquiry\n\
         2. Confirms we received their contact details\n\
         3. Explains a sales representative has been assigned and will contact them shortly\n\
         4. Closes courteously\n\n\
         Use a professional, friendly tone. Output only the email body."
    )
}

fn build_info_request_prompt(contact: &ContactRecord, original_subject: &str) -> String {
    let missing: Vec<String> = contact
        .missing()
        .iter()
        .map(|f| format!("   - {}", f.label()))
        .collect();

    format!(
        "A customer sent an inquiry but did not include the following information:\n{}\n\n\
         Original subject: {original_subject}\n\n\
         Write a polite reply email that:\n\
         1. Thanks them for the inquiry\n\
         2. Explains we need a few more details to help them accurately\n\
         3. Asks for exactly these items:\n{}\n\
         4. Promises a quick response once we have them\n\
         5. Closes courteously\n\n\
         Use a professional, friendly tone. Output only the email body.",
        missing.join("\n"),
        missing.join("\n"),
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Locate the first well-formed, brace-balanced JSON object inside `text`.
///
/// Tolerates code fences and surrounding prose. Braces inside JSON strings
/// don't count toward nesting.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }

        if let Some(end) = end {
            let candidate = &text[start..=end];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return Some(candidate);
            }
        }
        search_from = start + 1;
    }

    None
}

fn field_value(object: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        serde_json::Value::String(s) => normalize_value(Some(s.clone())),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a record from model output. `None` when no JSON object is found.
fn parse_contact_response(raw: &str, sender: &str) -> Option<ContactRecord> {
    let json = extract_json_object(raw)?;
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    let object = value.as_object()?;

    let email = field_value(object, "email").or_else(|| Some(sender.to_string()));

    Some(ContactRecord::new(
        field_value(object, "name"),
        field_value(object, "company"),
        field_value(object, "title"),
        field_value(object, "phone"),
        email,
    ))
}
