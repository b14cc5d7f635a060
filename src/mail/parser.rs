//! MIME decoding via `mail-parser`.
//!
//! Turns raw RFC 5322 bytes into an [`InboundMessage`]: stable id, decoded
//! subject, plain-text body and date.

use mail_parser::MessageParser;

use super::InboundMessage;
use super::error::{MailError, MailResult};

/// Parse a full message. `uid` is the transport-level id used when the
/// message carries no Message-ID header.
pub fn parse_message(uid: &str, data: &[u8]) -> MailResult<InboundMessage> {
    let message = MessageParser::default()
        .parse(data)
        .ok_or_else(|| MailError::Parse {
            message: format!(
                "failed to parse MIME message (uid: {uid}, {} bytes)",
                data.len()
            ),
        })?;

    let id = message
        .message_id()
        .map(bracket)
        .unwrap_or_else(|| fallback_id(uid));

    let subject = message.subject().unwrap_or_default().to_string();

    // body_text converts HTML to text when there is no text/plain part.
    let body = message
        .body_text(0)
        .map(|s| s.into_owned())
        .unwrap_or_default();

    let date = message.date().map(|dt| dt.to_rfc3339());

    Ok(InboundMessage {
        id,
        subject,
        body,
        date,
    })
}

/// Message id and decoded subject from a header-only fetch.
///
/// The id falls back to the transport uid as in [`parse_message`]; a missing
/// subject is empty.
pub fn parse_headers(uid: &str, headers: &[u8]) -> (String, String) {
    let Some(message) = MessageParser::default().parse(headers) else {
        return (fallback_id(uid), String::new());
    };
    let id = message
        .message_id()
        .map(bracket)
        .unwrap_or_else(|| fallback_id(uid));
    let subject = message.subject().unwrap_or_default().to_string();
    (id, subject)
}

/// Ledger ids keep the angle brackets of the raw header.
fn bracket(id: &str) -> String {
    format!("<{}>", id.trim().trim_start_matches('<').trim_end_matches('>'))
}

fn fallback_id(uid: &str) -> String {
    format!("<uid-{uid}>")
}
