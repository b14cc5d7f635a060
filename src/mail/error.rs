//! Mail subsystem error types with rich miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

/// Errors specific to the mail transport.
#[derive(Debug, Error, Diagnostic)]
pub enum MailError {
    #[error("mail connection failed: {message}")]
    #[diagnostic(
        code(intake::mail::connection),
        help(
            "Check that the mail server is reachable and the host/port are correct. \
             IMAP requires TLS on the configured port (usually 993)."
        )
    )]
    Connection { message: String },

    #[error("mail authentication failed: {message}")]
    #[diagnostic(
        code(intake::mail::auth),
        help(
            "Check mail.address and GMAIL_APP_PASSWORD. App passwords are revoked \
             when the account password changes."
        )
    )]
    Authentication { message: String },

    #[error("message parsing failed: {message}")]
    #[diagnostic(
        code(intake::mail::parse),
        help(
            "The MIME message could not be parsed. It may be malformed or use an \
             unsupported encoding. Check the raw message for RFC 5322 compliance."
        )
    )]
    Parse { message: String },

    #[error("mail transport unavailable: {message}")]
    #[diagnostic(
        code(intake::mail::unavailable),
        help("Rebuild with the `imap` feature enabled to fetch from a live mailbox.")
    )]
    Unavailable { message: String },
}

/// Convenience alias for mail operations.
pub type MailResult<T> = std::result::Result<T, MailError>;
