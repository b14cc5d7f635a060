//! Airtable REST client implementing [`RecordsStore`].
//!
//! Uses ureq (sync HTTP) with bearer-token auth. Deals and properties live in
//! two tables of one base; list calls follow the `offset` cursor until the
//! table is exhausted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::matcher::PropertyRecord;

use super::{DealDraft, DealRecord, PriceUpdate, RecordsStore};

// ── Field names ─────────────────────────────────────────────────────────

const F_ADDRESS: &str = "Address";
const F_ASKING_PRICE: &str = "Asking Price";
const F_BEDS: &str = "Beds";
const F_BATHS: &str = "Baths";
const F_SQFT: &str = "MLS SF";
const F_STAGE: &str = "Stage";
const F_IMAGES: &str = "Listing Images";
const F_URL: &str = "URL";
const F_PROPERTY: &str = "Property";
const F_LIST_PRICE: &str = "List Price";
const F_PRICE_CHANGES: &str = "Price Changes";
const F_PRICE_HISTORY: &str = "Price History";

/// Maximum body bytes quoted back in a status error.
const ERROR_PREVIEW: usize = 500;

/// Records store backed by an Airtable base.
pub struct AirtableStore {
    config: StoreConfig,
    api_key: String,
    agent: ureq::Agent,
}

impl AirtableStore {
    /// Create a client (does not connect yet).
    pub fn new(config: StoreConfig, api_key: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            config,
            api_key,
            agent,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.base_id),
            urlencoding::encode(table)
        )
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    /// List every record of `table`, optionally filtered by a formula.
    fn list_all(&self, table: &str, formula: Option<&str>) -> StoreResult<Vec<Value>> {
        let url = self.table_url(table);
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut req = self.agent.get(&url).set("Authorization", &self.auth());
            if let Some(f) = formula {
                req = req.query("filterByFormula", f);
            }
            if let Some(o) = &offset {
                req = req.query("offset", o);
            }
            let page = send(req, None)?;
            let (batch, next) = parse_page(&page)?;
            records.extend(batch);
            match next {
                Some(o) => offset = Some(o),
                None => break,
            }
        }

        tracing::debug!(table, count = records.len(), "listed records");
        Ok(records)
    }

    fn patch(&self, id: &str, fields: Map<String, Value>) -> StoreResult<()> {
        let url = format!(
            "{}/{}",
            self.table_url(&self.config.deals_table),
            urlencoding::encode(id)
        );
        let req = self
            .agent
            .request("PATCH", &url)
            .set("Authorization", &self.auth());
        send(req, Some(json!({ "fields": fields, "typecast": true })))?;
        Ok(())
    }
}

impl std::fmt::Debug for AirtableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirtableStore")
            .field("api_url", &self.config.api_url)
            .field("base_id", &self.config.base_id)
            .field("deals_table", &self.config.deals_table)
            .field("properties_table", &self.config.properties_table)
            .finish()
    }
}

impl RecordsStore for AirtableStore {
    fn list_properties(&self) -> StoreResult<Vec<PropertyRecord>> {
        let records = self.list_all(&self.config.properties_table, None)?;
        records.iter().map(parse_property).collect()
    }

    fn create_deal(&mut self, deal: &DealDraft) -> StoreResult<String> {
        let url = self.table_url(&self.config.deals_table);
        let req = self.agent.post(&url).set("Authorization", &self.auth());
        let body = json!({ "fields": draft_fields(deal), "typecast": true });
        let created = send(req, Some(body))?;
        created["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Response {
                message: "create response missing 'id'".to_string(),
            })
    }

    fn find_deals_by_address(&self, address: &str) -> StoreResult<Vec<DealRecord>> {
        let formula = address_formula(address);
        let records = self.list_all(&self.config.deals_table, Some(&formula))?;
        records.iter().map(parse_deal).collect()
    }

    fn update_deal(&mut self, id: &str, update: &PriceUpdate) -> StoreResult<()> {
        self.patch(id, update_fields(update))
    }

    fn link_property(&mut self, deal_id: &str, property_id: &str) -> StoreResult<()> {
        let mut fields = Map::new();
        fields.insert(F_PROPERTY.to_string(), json!([property_id]));
        self.patch(deal_id, fields)
    }
}

// ── Request plumbing ────────────────────────────────────────────────────

fn send(req: ureq::Request, body: Option<Value>) -> StoreResult<Value> {
    let result = match body {
        Some(b) => req.send_json(b),
        None => req.call(),
    };
    match result {
        Ok(resp) => resp.into_json::<Value>().map_err(|e| StoreError::Response {
            message: format!("invalid JSON body: {e}"),
        }),
        Err(ureq::Error::Status(code, resp)) => {
            let mut body = resp.into_string().unwrap_or_default();
            if body.len() > ERROR_PREVIEW {
                let mut end = ERROR_PREVIEW;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            Err(StoreError::Status {
                status: code,
                message: body,
            })
        }
        Err(ureq::Error::Transport(transport)) => Err(StoreError::Request {
            message: transport.to_string(),
        }),
    }
}

// ── Payload mapping ─────────────────────────────────────────────────────

/// `FIND('<address>', {Address}) > 0`, with the address quoted for the formula language.
fn address_formula(address: &str) -> String {
    let escaped = address.replace('\\', "\\\\").replace('\'', "\\'");
    format!("FIND('{escaped}', {{{F_ADDRESS}}}) > 0")
}

fn draft_fields(deal: &DealDraft) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(address) = &deal.address {
        fields.insert(F_ADDRESS.into(), json!(address));
    }
    fields.insert(F_ASKING_PRICE.into(), json!(deal.asking_price));
    if let Some(beds) = deal.beds {
        fields.insert(F_BEDS.into(), json!(beds));
    }
    if let Some(baths) = deal.baths {
        fields.insert(F_BATHS.into(), json!(baths));
    }
    fields.insert(F_SQFT.into(), json!(deal.sqft));
    fields.insert(F_STAGE.into(), json!(deal.stage));
    let images: Vec<Value> = deal.image_urls.iter().map(|u| json!({ "url": u })).collect();
    fields.insert(F_IMAGES.into(), Value::Array(images));
    if let Some(url) = &deal.listing_url {
        fields.insert(F_URL.into(), json!(url));
    }
    fields
}

fn update_fields(update: &PriceUpdate) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(F_LIST_PRICE.into(), json!(update.list_price));
    if let Some(changes) = &update.price_changes {
        fields.insert(F_PRICE_CHANGES.into(), json!(changes));
    }
    fields.insert(F_PRICE_HISTORY.into(), json!(update.price_history));
    fields
}

fn parse_page(page: &Value) -> StoreResult<(Vec<Value>, Option<String>)> {
    let records = page["records"]
        .as_array()
        .cloned()
        .ok_or_else(|| StoreError::Response {
            message: "list response missing 'records'".to_string(),
        })?;
    let offset = page["offset"].as_str().map(str::to_string);
    Ok((records, offset))
}

fn record_id(record: &Value) -> StoreResult<String> {
    record["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| StoreError::Response {
            message: "record missing 'id'".to_string(),
        })
}

fn parse_property(record: &Value) -> StoreResult<PropertyRecord> {
    Ok(PropertyRecord {
        id: record_id(record)?,
        address: record["fields"][F_ADDRESS].as_str().map(str::to_string),
    })
}

fn parse_deal(record: &Value) -> StoreResult<DealRecord> {
    let id = record_id(record)?;
    let created = record["createdTime"].as_str().unwrap_or_default();
    let created_time = DateTime::parse_from_rfc3339(created)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Response {
            message: format!("record {id} has bad createdTime '{created}': {e}"),
        })?;
    Ok(DealRecord {
        address: record["fields"][F_ADDRESS].as_str().map(str::to_string),
        price_history: record["fields"][F_PRICE_HISTORY]
            .as_str()
            .map(str::to_string),
        created_time,
        id,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::INITIAL_STAGE;

    fn store(base_id: &str) -> AirtableStore {
        let config = StoreConfig {
            base_id: base_id.into(),
            ..StoreConfig::default()
        };
        AirtableStore::new(config, "key".into())
    }

    #[test]
    fn table_url_encodes_path_segments() {
        let s = store("appX");
        assert_eq!(
            s.table_url("Deals/2024 #1"),
            "https://api.airtable.com/v0/appX/Deals%2F2024%20%231"
        );
        assert_eq!(s.table_url("Deals"), "https://api.airtable.com/v0/appX/Deals");
        assert_eq!(
            store("app?x").table_url("Properties"),
            "https://api.airtable.com/v0/app%3Fx/Properties"
        );
    }

    #[test]
    fn formula_escapes_quotes() {
        assert_eq!(
            address_formula("12 O'Hara Ln"),
            r"FIND('12 O\'Hara Ln', {Address}) > 0"
        );
    }

    #[test]
    fn draft_fields_omit_absent_values() {
        let deal = DealDraft {
            address: Some("123 Main St".into()),
            asking_price: 450_000.0,
            beds: Some(3),
            baths: None,
            sqft: 0.0,
            stage: INITIAL_STAGE.into(),
            image_urls: vec!["https://img/1.jpg".into()],
            listing_url: None,
        };
        let fields = draft_fields(&deal);
        assert_eq!(fields[F_ADDRESS], json!("123 Main St"));
        assert_eq!(fields[F_ASKING_PRICE], json!(450_000.0));
        assert_eq!(fields[F_BEDS], json!(3));
        assert!(!fields.contains_key(F_BATHS));
        assert!(!fields.contains_key(F_URL));
        assert_eq!(fields[F_STAGE], json!("1-New"));
        assert_eq!(fields[F_IMAGES], json!([{ "url": "https://img/1.jpg" }]));
    }

    #[test]
    fn update_fields_carry_history() {
        let update = PriceUpdate {
            list_price: 400_000.0,
            price_changes: None,
            price_history: "$450,000.00 on t1\n$400,000.00 on t2".into(),
        };
        let fields = update_fields(&update);
        assert_eq!(fields[F_LIST_PRICE], json!(400_000.0));
        assert!(!fields.contains_key(F_PRICE_CHANGES));
        assert!(fields[F_PRICE_HISTORY].as_str().unwrap().contains("t2"));
    }

    #[test]
    fn parses_page_and_deal() {
        let page = json!({
            "records": [{
                "id": "recA",
                "createdTime": "2024-03-01T12:00:00.000Z",
                "fields": { "Address": "123 Main St", "Price History": "$1.00 on t0" }
            }],
            "offset": "itrNext"
        });
        let (records, offset) = parse_page(&page).unwrap();
        assert_eq!(offset.as_deref(), Some("itrNext"));
        let deal = parse_deal(&records[0]).unwrap();
        assert_eq!(deal.id, "recA");
        assert_eq!(deal.address.as_deref(), Some("123 Main St"));
        assert_eq!(deal.price_history.as_deref(), Some("$1.00 on t0"));
    }

    #[test]
    fn property_without_address_is_kept_as_none() {
        let prop = parse_property(&json!({ "id": "recP", "fields": {} })).unwrap();
        assert_eq!(prop.address, None);
    }

    #[test]
    fn page_without_records_is_an_error() {
        assert!(parse_page(&json!({ "error": "NOT_FOUND" })).is_err());
    }
}
