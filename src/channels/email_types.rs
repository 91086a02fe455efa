//! Email-specific types: inbound Message struct, quote stripping, sender parsing.

use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};

/// An inbound message as fetched from the mailbox. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Provider message id.
    pub id: String,
    /// Bare sender address parsed from the `From` header.
    pub sender: String,
    pub subject: String,
    /// Decoded, trimmed plain-text body.
    pub body: String,
}

/// Strip quoted text from an email body.
///
/// Removes:
/// - Lines starting with `>` (quoted reply lines)
/// - "On ... wrote:" attribution lines and everything after them
/// - "--- Original Message ---" separators and everything after them
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        // "On Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:"
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }

        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Extract the bare address from a raw `From` header value.
///
/// `"Alice Kim <alice@example.com>"` gives `alice@example.com`. Values that
/// don't parse as an address come back trimmed but otherwise unchanged.
pub fn parse_sender_address(raw_from: &str) -> String {
    let raw_from = raw_from.trim();
    if raw_from.is_empty() {
        return String::new();
    }

    let header = format!("From: {raw_from}\r\n\r\n");
    MessageParser::default()
        .parse_headers(header.as_bytes())
        .and_then(|parsed| {
            parsed
                .from()
                .and_then(|addr| addr.first())
                .and_then(|a| a.address())
                .map(|s| s.to_string())
        })
        .filter(|addr| addr.contains('@'))
        .unwrap_or_else(|| raw_from.to_string())
}

/// Case-insensitive check of a raw `From` header against the mailbox's own address.
pub fn is_from_self(raw_from: &str, self_address: &str) -> bool {
    !self_address.is_empty()
        && raw_from
            .to_lowercase()
            .contains(&self_address.to_lowercase())
}
