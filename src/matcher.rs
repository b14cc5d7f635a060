//! Approximate street-address matching against a property snapshot.
//!
//! Scores are the indel similarity ratio on a 0–100 scale: twice the longest
//! common subsequence over the combined length, computed case-insensitively
//! over whole strings. A candidate must score at least [`MATCH_THRESHOLD`] and
//! strictly beat the current best, so ties keep the earliest candidate.

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::store::RecordsStore;

/// Minimum similarity (0–100) for a property to be considered the same address.
pub const MATCH_THRESHOLD: u8 = 90;

/// A property record from the external store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub id: String,
    /// Missing addresses are common in the records store and are skipped.
    pub address: Option<String>,
}

impl PropertyRecord {
    pub fn new(id: impl Into<String>, address: Option<&str>) -> Self {
        Self {
            id: id.into(),
            address: address.map(str::to_string),
        }
    }
}

// ── PropertySnapshot ────────────────────────────────────────────────────

/// Owned, immutable list of properties loaded once per engine.
///
/// Properties added to the store after loading are invisible until
/// [`crate::pipeline::Intake::refresh_snapshot`] is called.
#[derive(Debug, Clone, Default)]
pub struct PropertySnapshot {
    properties: Vec<PropertyRecord>,
}

impl PropertySnapshot {
    pub fn new(properties: Vec<PropertyRecord>) -> Self {
        Self { properties }
    }

    /// Load the full property list from the records store.
    pub fn load(store: &dyn RecordsStore) -> StoreResult<Self> {
        let properties = store.list_properties()?;
        tracing::info!(count = properties.len(), "property snapshot loaded");
        Ok(Self { properties })
    }

    /// Best matching property for `address`, if any clears the threshold.
    pub fn find_best_match(&self, address: &str) -> Option<&PropertyRecord> {
        find_best_match(address, &self.properties)
    }

    pub fn properties(&self) -> &[PropertyRecord] {
        &self.properties
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

// ── Matching ────────────────────────────────────────────────────────────

/// Resolve `address` to at most one candidate.
///
/// Candidates without an address are skipped. Returns `None` when nothing
/// scores at least [`MATCH_THRESHOLD`].
pub fn find_best_match<'a>(
    address: &str,
    candidates: &'a [PropertyRecord],
) -> Option<&'a PropertyRecord> {
    let needle = address.to_lowercase();
    let scored = candidates.iter().filter_map(|candidate| {
        let theirs = candidate.address.as_deref()?;
        Some((candidate, similarity_ratio(&needle, &theirs.to_lowercase())))
    });
    pick_best(scored).map(|(candidate, score)| {
        tracing::debug!(property = %candidate.id, score, "matched property");
        candidate
    })
}

/// Select the first item with the highest score at or above the threshold.
pub fn pick_best<T>(scored: impl IntoIterator<Item = (T, u8)>) -> Option<(T, u8)> {
    let mut best: Option<(T, u8)> = None;
    for (item, score) in scored {
        let best_score = best.as_ref().map(|(_, s)| *s).unwrap_or(0);
        if score > best_score && score >= MATCH_THRESHOLD {
            best = Some((item, score));
        }
    }
    best
}

/// Similarity of two strings on a 0–100 scale. Empty input scores 0.
pub fn similarity_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let lcs = lcs_len(&a, &b);
    let ratio = 200.0 * lcs as f64 / (a.len() + b.len()) as f64;
    ratio.round() as u8
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// ── Tests ───────────────────────────────────────────────────────────────
