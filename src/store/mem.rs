//! In-memory records store.
//!
//! Mirrors the behavior of the hosted store closely enough for tests:
//! case-sensitive substring search, monotonically increasing creation times,
//! and optional injected failures.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::{StoreError, StoreResult};
use crate::matcher::PropertyRecord;

use super::{DealDraft, DealRecord, PriceUpdate, RecordsStore};

/// A deal as held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDeal {
    pub id: String,
    pub draft: Option<DealDraft>,
    pub address: Option<String>,
    pub list_price: Option<f64>,
    pub price_changes: Option<String>,
    pub price_history: Option<String>,
    pub property: Option<String>,
    pub created_time: DateTime<Utc>,
}

/// Records store backed by plain vectors.
#[derive(Debug)]
pub struct MemoryStore {
    properties: Vec<PropertyRecord>,
    deals: Vec<StoredDeal>,
    next_id: u64,
    clock: DateTime<Utc>,
    fail_creates: bool,
    fail_links: bool,
    calls: Vec<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            properties: Vec::new(),
            deals: Vec::new(),
            next_id: 1,
            clock: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            fail_creates: false,
            fail_links: false,
            calls: Vec::new(),
        }
    }

    /// Create a store pre-populated with properties.
    pub fn with_properties(properties: Vec<PropertyRecord>) -> Self {
        Self {
            properties,
            ..Self::new()
        }
    }

    /// Seed an existing deal, as if created earlier, and return its id.
    pub fn seed_deal(&mut self, address: &str, price_history: Option<&str>) -> String {
        let id = self.allocate_id();
        let created_time = self.tick();
        self.deals.push(StoredDeal {
            id: id.clone(),
            draft: None,
            address: Some(address.to_string()),
            list_price: None,
            price_changes: None,
            price_history: price_history.map(str::to_string),
            property: None,
            created_time,
        });
        id
    }

    /// Make every subsequent `create_deal` fail.
    pub fn fail_creates(&mut self, fail: bool) {
        self.fail_creates = fail;
    }

    /// Make every subsequent `link_property` fail.
    pub fn fail_links(&mut self, fail: bool) {
        self.fail_links = fail;
    }

    pub fn deals(&self) -> &[StoredDeal] {
        &self.deals
    }

    pub fn deal(&self, id: &str) -> Option<&StoredDeal> {
        self.deals.iter().find(|d| d.id == id)
    }

    /// Names of the mutating calls made so far, in order.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    fn allocate_id(&mut self) -> String {
        let id = format!("rec{:04}", self.next_id);
        self.next_id += 1;
        id
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn deal_mut(&mut self, id: &str) -> StoreResult<&mut StoredDeal> {
        self.deals
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordsStore for MemoryStore {
    fn list_properties(&self) -> StoreResult<Vec<PropertyRecord>> {
        Ok(self.properties.clone())
    }

    fn create_deal(&mut self, deal: &DealDraft) -> StoreResult<String> {
        if self.fail_creates {
            return Err(StoreError::Request {
                message: "injected create failure".to_string(),
            });
        }
        let id = self.allocate_id();
        let created_time = self.tick();
        self.calls.push(format!("create {id}"));
        self.deals.push(StoredDeal {
            id: id.clone(),
            draft: Some(deal.clone()),
            address: deal.address.clone(),
            list_price: None,
            price_changes: None,
            price_history: None,
            property: None,
            created_time,
        });
        Ok(id)
    }

    fn find_deals_by_address(&self, address: &str) -> StoreResult<Vec<DealRecord>> {
        Ok(self
            .deals
            .iter()
            .filter(|d| d.address.as_deref().is_some_and(|a| a.contains(address)))
            .map(|d| DealRecord {
                id: d.id.clone(),
                address: d.address.clone(),
                price_history: d.price_history.clone(),
                created_time: d.created_time,
            })
            .collect())
    }

    fn update_deal(&mut self, id: &str, update: &PriceUpdate) -> StoreResult<()> {
        let deal = self.deal_mut(id)?;
        deal.list_price = Some(update.list_price);
        if update.price_changes.is_some() {
            deal.price_changes = update.price_changes.clone();
        }
        deal.price_history = Some(update.price_history.clone());
        self.calls.push(format!("update {id}"));
        Ok(())
    }

    fn link_property(&mut self, deal_id: &str, property_id: &str) -> StoreResult<()> {
        if self.fail_links {
            return Err(StoreError::Request {
                message: "injected link failure".to_string(),
            });
        }
        let deal = self.deal_mut(deal_id)?;
        deal.property = Some(property_id.to_string());
        self.calls.push(format!("link {deal_id} {property_id}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::INITIAL_STAGE;

    fn draft(address: &str) -> DealDraft {
        DealDraft {
            address: Some(address.to_string()),
            asking_price: 100_000.0,
            beds: None,
            baths: None,
            sqft: 0.0,
            stage: INITIAL_STAGE.to_string(),
            image_urls: Vec::new(),
            listing_url: None,
        }
    }

    #[test]
    fn create_assigns_increasing_ids_and_times() {
        let mut store = MemoryStore::new();
        let a = store.create_deal(&draft("1 A St")).unwrap();
        let b = store.create_deal(&draft("2 B St")).unwrap();
        assert_ne!(a, b);
        assert!(store.deal(&b).unwrap().created_time > store.deal(&a).unwrap().created_time);
    }

    #[test]
    fn substring_search_is_case_sensitive() {
        let mut store = MemoryStore::new();
        store.seed_deal("123 Main St, Springfield", None);
        assert_eq!(store.find_deals_by_address("123 Main St").unwrap().len(), 1);
        assert!(store.find_deals_by_address("123 MAIN ST").unwrap().is_empty());
    }

    #[test]
    fn update_unknown_deal_fails() {
        let mut store = MemoryStore::new();
        let update = PriceUpdate {
            list_price: 1.0,
            price_changes: None,
            price_history: String::new(),
        };
        assert!(matches!(
            store.update_deal("nope", &update),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn injected_failures() {
        let mut store = MemoryStore::new();
        store.fail_creates(true);
        assert!(store.create_deal(&draft("1 A St")).is_err());
        assert!(store.deals().is_empty());

        store.fail_creates(false);
        store.fail_links(true);
        let id = store.create_deal(&draft("1 A St")).unwrap();
        assert!(store.link_property(&id, "prop1").is_err());
        assert_eq!(store.deal(&id).unwrap().property, None);
    }
}
