//! Processed-message ledger: the durable set of message ids already reconciled.
//!
//! An id is appended only after its store mutation succeeded, so a run that is
//! interrupted mid-mutation leaves the message eligible for the next run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{LedgerError, LedgerResult};

/// Append-only set of processed message ids.
pub trait MessageLedger {
    fn contains(&self, id: &str) -> bool;

    /// Record `id` as processed. Appending an id twice is a no-op.
    fn append(&mut self, id: &str) -> LedgerResult<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── MemoryLedger ────────────────────────────────────────────────────────

/// Non-durable ledger for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    ids: Vec<String>,
    index: HashSet<String>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids in append order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

impl MessageLedger for MemoryLedger {
    fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    fn append(&mut self, id: &str) -> LedgerResult<()> {
        if self.index.insert(id.to_string()) {
            self.ids.push(id.to_string());
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

// ── JsonLedger ──────────────────────────────────────────────────────────

/// Ledger persisted as a JSON array of ids.
///
/// Every append rewrites the file through a sibling temp file and a rename,
/// so a crash never leaves a half-written ledger.
#[derive(Debug)]
pub struct JsonLedger {
    path: PathBuf,
    inner: MemoryLedger,
}

impl JsonLedger {
    /// Open the ledger at `path`. A missing file is an empty ledger.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let mut inner = MemoryLedger::new();
        if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| LedgerError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            if !text.trim().is_empty() {
                let ids: Vec<String> =
                    serde_json::from_str(&text).map_err(|e| LedgerError::Corrupt {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })?;
                for id in ids {
                    inner.append(&id)?;
                }
            }
        }
        tracing::debug!(path = %path.display(), count = inner.len(), "ledger opened");
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> LedgerResult<()> {
        let io_err = |e: std::io::Error| LedgerError::Io {
            path: self.path.display().to_string(),
            source: e,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let text = serde_json::to_string_pretty(self.inner.ids()).map_err(|e| {
            LedgerError::Corrupt {
                path: self.path.display().to_string(),
                message: e.to_string(),
            }
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl MessageLedger for JsonLedger {
    fn contains(&self, id: &str) -> bool {
        self.inner.contains(id)
    }

    fn append(&mut self, id: &str) -> LedgerResult<()> {
        if self.inner.contains(id) {
            return Ok(());
        }
        self.inner.append(id)?;
        self.persist()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
