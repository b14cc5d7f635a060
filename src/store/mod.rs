//! Records store abstraction for deals and properties.
//!
//! Two implementations share the [`RecordsStore`] trait:
//!
//! - [`MemoryStore`]: in-process tables for tests and dry runs
//! - [`AirtableStore`]: the Airtable REST API over sync HTTP (ureq)
//!
//! All calls are blocking; the engine is single-threaded and issues one
//! request at a time.

pub mod airtable;
pub mod mem;

pub use airtable::AirtableStore;
pub use mem::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::matcher::PropertyRecord;

/// Stage assigned to every newly created deal.
pub const INITIAL_STAGE: &str = "1-New";

/// Payload for a new deal record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealDraft {
    pub address: Option<String>,
    pub asking_price: f64,
    pub beds: Option<u32>,
    pub baths: Option<f64>,
    /// Square footage; 0 when the notification did not state it.
    pub sqft: f64,
    pub stage: String,
    pub image_urls: Vec<String>,
    pub listing_url: Option<String>,
}

/// An existing deal, as much of it as reconciliation reads back.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DealRecord {
    pub id: String,
    pub address: Option<String>,
    pub price_history: Option<String>,
    pub created_time: DateTime<Utc>,
}

/// Field changes applied to a deal on a price drop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceUpdate {
    pub list_price: f64,
    /// `"Reduced by $X on <ts>"`, when the notification stated the change.
    pub price_changes: Option<String>,
    /// Full cumulative history, prior lines included.
    pub price_history: String,
}

/// External records store holding deals and properties.
pub trait RecordsStore {
    /// Every property record, in store order.
    fn list_properties(&self) -> StoreResult<Vec<PropertyRecord>>;

    /// Create a deal and return its store-assigned id.
    fn create_deal(&mut self, deal: &DealDraft) -> StoreResult<String>;

    /// Deals whose address field contains `address` (case-sensitive).
    fn find_deals_by_address(&self, address: &str) -> StoreResult<Vec<DealRecord>>;

    /// Apply a price update to an existing deal.
    fn update_deal(&mut self, id: &str, update: &PriceUpdate) -> StoreResult<()>;

    /// Link a deal to a property record.
    fn link_property(&mut self, deal_id: &str, property_id: &str) -> StoreResult<()>;
}
