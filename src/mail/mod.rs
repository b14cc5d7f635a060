//! Mail transport subsystem: mailbox sources and MIME parsing.
//!
//! IMAP access is feature-gated under `imap` (on by default). Everything the
//! engine needs from mail is an [`InboundMessage`]: a stable id plus decoded
//! subject and body.

pub mod connector;
pub mod error;
pub mod parser;

pub use connector::{
    ImapSource, MailSource, MessageHeader, MessageSelector, MockSource, select_batch,
};
pub use error::{MailError, MailResult};
pub use parser::{parse_headers, parse_message};

use serde::{Deserialize, Serialize};

use crate::extract::message_text;

/// A decoded message ready for classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Stable unique id (the Message-ID header, angle brackets included).
    pub id: String,
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// RFC 3339 date from the Date header, if present.
    pub date: Option<String>,
}

impl InboundMessage {
    /// Subject and body joined the way extraction patterns expect.
    pub fn text(&self) -> String {
        message_text(&self.subject, &self.body)
    }
}
