//! Runtime configuration: a TOML file plus secrets from the environment.
//!
//! ```toml
//! templates_dir = "templates"
//! ledger_path = "processed_emails.json"
//!
//! [mail]
//! address = "deals@example.com"
//! check_interval_minutes = 15
//!
//! [store]
//! base_id = "appXXXXXXXXXXXXXX"
//! ```
//!
//! Secrets never live in the file: `GMAIL_APP_PASSWORD` and `AIRTABLE_API_KEY`
//! are read from the environment, optionally seeded from `.env`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Environment variable holding the mailbox app password.
pub const ENV_MAIL_PASSWORD: &str = "GMAIL_APP_PASSWORD";
/// Environment variable holding the records store API key.
pub const ENV_STORE_API_KEY: &str = "AIRTABLE_API_KEY";

/// Default config file name in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "intake.toml";

// ── MailConfig ──────────────────────────────────────────────────────────

/// Mailbox connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Mailbox address; also the IMAP login.
    pub address: String,
    pub host: String,
    pub port: u16,
    pub mailbox: String,
    /// Minutes between runs in `watch` mode.
    pub check_interval_minutes: u64,
    /// Maximum messages reconciled per run.
    pub batch_limit: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            host: "imap.gmail.com".to_string(),
            port: 993,
            mailbox: "INBOX".to_string(),
            check_interval_minutes: 15,
            batch_limit: 50,
        }
    }
}

impl MailConfig {
    /// The check interval as a `Duration`.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes.saturating_mul(60))
    }
}

// ── StoreConfig ─────────────────────────────────────────────────────────

/// Records store identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub base_id: String,
    pub deals_table: String,
    pub properties_table: String,
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_id: String::new(),
            deals_table: "Deals".to_string(),
            properties_table: "Properties".to_string(),
            api_url: "https://api.airtable.com/v0".to_string(),
            timeout_secs: 30,
        }
    }
}

// ── IntakeConfig ────────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub templates_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub mail: MailConfig,
    pub store: StoreConfig,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            ledger_path: PathBuf::from("processed_emails.json"),
            mail: MailConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl IntakeConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                    path: parent.display().to_string(),
                    source: e,
                })?;
            }
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Validate this configuration, returning an error if invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };
        if self.mail.address.trim().is_empty() {
            return invalid("mail.address must not be empty");
        }
        if self.mail.host.trim().is_empty() {
            return invalid("mail.host must not be empty");
        }
        if self.mail.port == 0 {
            return invalid("mail.port must be non-zero");
        }
        if self.mail.check_interval_minutes == 0 {
            return invalid("mail.check_interval_minutes must be at least 1");
        }
        if self.mail.batch_limit == 0 {
            return invalid("mail.batch_limit must be at least 1");
        }
        if self.store.base_id.trim().is_empty() {
            return invalid("store.base_id must not be empty");
        }
        Ok(())
    }

    /// Resolve relative paths against the directory holding the config file.
    pub fn resolve_paths(&mut self, config_path: &Path) {
        let Some(base) = config_path.parent() else {
            return;
        };
        if self.templates_dir.is_relative() {
            self.templates_dir = base.join(&self.templates_dir);
        }
        if self.ledger_path.is_relative() {
            self.ledger_path = base.join(&self.ledger_path);
        }
    }
}

// ── Secrets ─────────────────────────────────────────────────────────────

/// Load `.env` from the working directory, if present. Existing variables win.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "ignoring unreadable .env"),
    }
}

/// Read a required secret from the environment.
pub fn secret(name: &str) -> ConfigResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingSecret {
            name: name.to_string(),
        })
}
