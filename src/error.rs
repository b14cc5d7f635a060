//! Rich diagnostic error types for the listing intake engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so an operator knows exactly which
//! collaborator failed and whether the message will be retried.

use miette::Diagnostic;
use thiserror::Error;

pub use crate::mail::error::MailError;

/// Top-level error type for the intake engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum IntakeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Convenience alias for engine-level operations.
pub type IntakeResult<T> = std::result::Result<T, IntakeError>;

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(intake::config::read),
        help("Run `listing-intake init` to write a default configuration, or pass --config.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file: {path}")]
    #[diagnostic(
        code(intake::config::write),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    #[diagnostic(
        code(intake::config::parse),
        help("The configuration must be valid TOML with [mail] and [store] sections.")
    )]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(intake::config::invalid),
        help(
            "Required: mail.address, store.base_id, a non-zero mail.port, \
             check_interval_minutes >= 1 and batch_limit >= 1."
        )
    )]
    Invalid { message: String },

    #[error("missing secret: {name}")]
    #[diagnostic(
        code(intake::config::missing_secret),
        help("Export {name} in the environment or add it to a .env file in the working directory.")
    )]
    MissingSecret { name: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Template errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TemplateError {
    #[error("template \"{template}\" is missing required pattern \"{field}\"")]
    #[diagnostic(
        code(intake::template::missing_field),
        help(
            "Every template must define `trigger`, `complete_address`, `listing_url` \
             and `image_urls` under `patterns`."
        )
    )]
    MissingField { template: String, field: String },

    #[error("template \"{template}\": pattern for \"{field}\" is invalid: {message}")]
    #[diagnostic(
        code(intake::template::bad_regex),
        help("Patterns use Rust `regex` syntax. Look-around and backreferences are not supported.")
    )]
    InvalidPattern {
        template: String,
        field: String,
        message: String,
    },

    #[error(
        "template \"{template}\": pattern for \"{field}\" needs {expected} capture group(s), found {found}"
    )]
    #[diagnostic(
        code(intake::template::capture_groups),
        help(
            "`complete_address` captures street, city, state and zip in groups 1-4. \
             Ordinary fields take their value from group 1."
        )
    )]
    CaptureGroups {
        template: String,
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("duplicate template name: \"{name}\"")]
    #[diagnostic(
        code(intake::template::duplicate),
        help("Template names must be unique across the templates directory.")
    )]
    Duplicate { name: String },

    #[error("failed to read template source {path}")]
    #[diagnostic(
        code(intake::template::io),
        help("Check that templates_dir exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template file {path}: {message}")]
    #[diagnostic(
        code(intake::template::parse),
        help("Template files are JSON or TOML with `name`, `trigger_pattern` and `patterns` keys.")
    )]
    Parse { path: String, message: String },
}

pub type TemplateResult<T> = std::result::Result<T, TemplateError>;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("records store request failed: {message}")]
    #[diagnostic(
        code(intake::store::request),
        help(
            "The records store could not be reached or rejected the request. \
             The message stays unprocessed and will be retried on the next run."
        )
    )]
    Request { message: String },

    #[error("records store returned status {status}: {message}")]
    #[diagnostic(
        code(intake::store::status),
        help("401/403 usually means AIRTABLE_API_KEY is wrong; 422 means a field name or type mismatch.")
    )]
    Status { status: u16, message: String },

    #[error("unexpected records store response: {message}")]
    #[diagnostic(
        code(intake::store::response),
        help("The response body did not have the expected shape.")
    )]
    Response { message: String },

    #[error("record not found: {id}")]
    #[diagnostic(
        code(intake::store::not_found),
        help("The record may have been deleted between lookup and update.")
    )]
    NotFound { id: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Ledger errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LedgerError {
    #[error("ledger I/O error at {path}")]
    #[diagnostic(
        code(intake::ledger::io),
        help(
            "The processed-message ledger could not be read or written. Check ledger_path \
             permissions and free disk space."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger file {path} is corrupt: {message}")]
    #[diagnostic(
        code(intake::ledger::corrupt),
        help("The ledger must be a JSON array of message id strings.")
    )]
    Corrupt { path: String, message: String },
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// Reconcile errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ReconcileError {
    #[error("no reconciliation branch for trigger \"{trigger}\"")]
    #[diagnostic(
        code(intake::reconcile::unhandled_trigger),
        help(
            "Only \"new listing\" and \"price drop\" are reconciled. The message is left \
             unprocessed so it can be retried once a handler exists."
        )
    )]
    UnhandledTrigger { trigger: String },

    #[error("extracted event is missing required field \"{field}\"")]
    #[diagnostic(
        code(intake::reconcile::missing_field),
        help("Check the template pattern for this field against the message text.")
    )]
    MissingField { field: String },

    #[error("field \"{field}\" has unparseable value \"{value}\"")]
    #[diagnostic(
        code(intake::reconcile::invalid_field),
        help("Numeric fields may contain digits, commas, a decimal point and a leading `$`.")
    )]
    InvalidField { field: String, value: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;
