//! Mailbox abstraction for inbound inquiries and outbound replies.

pub mod email_types;
pub mod gmail;
pub mod oauth;

pub use email_types::{Message, strip_quoted_text};
pub use gmail::{GmailConfig, GmailMailbox};

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::services::Authenticatable;

/// A mailbox the workflow reads inquiries from and replies through.
#[async_trait]
pub trait Mailbox: Authenticatable {
    /// Messages received within the last `lookback_minutes`, excluding mail
    /// sent by this mailbox. Order is not guaranteed.
    async fn get_recent_messages(
        &self,
        lookback_minutes: u32,
        max_results: u32,
    ) -> Result<Vec<Message>, ChannelError>;

    /// Send a plain-text reply.
    async fn send_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        original_message_id: &str,
    ) -> Result<(), ChannelError>;
}
