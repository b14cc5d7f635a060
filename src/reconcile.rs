//! Create-vs-update decisions against the records store.
//!
//! A `"new listing"` event creates a deal and, when the street address
//! resolves to a known property, links the two. A `"price drop"` event updates
//! the most recent deal whose address contains the street address and appends
//! a line to its price history. Any other trigger is an error, so the message
//! is never silently marked as processed.

use crate::error::{ReconcileError, ReconcileResult};
use crate::extract::ExtractedEvent;
use crate::matcher::PropertySnapshot;
use crate::store::{DealDraft, DealRecord, INITIAL_STAGE, PriceUpdate, RecordsStore};

/// Reconciliation branch selected by an event's trigger label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    NewListing,
    PriceDrop,
    Other(String),
}

impl Trigger {
    /// Classify a label. Only the exact lowercase labels are recognized.
    pub fn parse(label: &str) -> Self {
        match label {
            "new listing" => Self::NewListing,
            "price drop" => Self::PriceDrop,
            _ => Self::Other(label.to_string()),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewListing => write!(f, "new listing"),
            Self::PriceDrop => write!(f, "price drop"),
            Self::Other(label) => write!(f, "{label}"),
        }
    }
}

/// What a reconciled event did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Created {
        deal_id: String,
        /// Property the deal was linked to.
        property_id: Option<String>,
        /// Set when a match was found but linking failed. The deal still exists.
        link_error: Option<String>,
    },
    Updated {
        deal_id: String,
        list_price: f64,
    },
    /// Price drop for an address with no deal on record.
    NoTarget { address: String },
}

impl ReconcileOutcome {
    /// Whether the store was mutated, so the message may enter the ledger.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::Updated { .. })
    }
}

/// Apply `event` to `store`.
///
/// `timestamp` is used in price-history lines when the event carries none.
pub fn reconcile(
    store: &mut dyn RecordsStore,
    snapshot: &PropertySnapshot,
    event: &ExtractedEvent,
    timestamp: &str,
) -> ReconcileResult<ReconcileOutcome> {
    match Trigger::parse(&event.trigger) {
        Trigger::NewListing => create_listing(store, snapshot, event),
        Trigger::PriceDrop => apply_price_drop(store, event, timestamp),
        Trigger::Other(trigger) => Err(ReconcileError::UnhandledTrigger { trigger }),
    }
}

// ── New listing ─────────────────────────────────────────────────────────

fn create_listing(
    store: &mut dyn RecordsStore,
    snapshot: &PropertySnapshot,
    event: &ExtractedEvent,
) -> ReconcileResult<ReconcileOutcome> {
    let draft = deal_draft(event)?;
    let deal_id = store.create_deal(&draft)?;
    tracing::info!(deal = %deal_id, address = ?draft.address, "created deal");

    let street = event
        .street_address
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(street) = street else {
        tracing::warn!(deal = %deal_id, "no street address; skipping property match");
        return Ok(ReconcileOutcome::Created {
            deal_id,
            property_id: None,
            link_error: None,
        });
    };

    let Some(property) = snapshot.find_best_match(street) else {
        tracing::info!(deal = %deal_id, address = street, "no matching property");
        return Ok(ReconcileOutcome::Created {
            deal_id,
            property_id: None,
            link_error: None,
        });
    };

    match store.link_property(&deal_id, &property.id) {
        Ok(()) => {
            tracing::info!(deal = %deal_id, property = %property.id, "linked deal to property");
            Ok(ReconcileOutcome::Created {
                deal_id,
                property_id: Some(property.id.clone()),
                link_error: None,
            })
        }
        Err(e) => {
            tracing::warn!(deal = %deal_id, property = %property.id, error = %e, "property link failed");
            Ok(ReconcileOutcome::Created {
                deal_id,
                property_id: None,
                link_error: Some(e.to_string()),
            })
        }
    }
}

/// Build the create payload for a new-listing event.
pub fn deal_draft(event: &ExtractedEvent) -> ReconcileResult<DealDraft> {
    let price = required(event.price.as_deref(), "price")?;
    Ok(DealDraft {
        address: event.street_address.clone(),
        asking_price: parse_amount("price", price)?,
        beds: event
            .bedrooms
            .as_deref()
            .map(|v| parse_count("bedrooms", v))
            .transpose()?,
        baths: event
            .bathrooms
            .as_deref()
            .map(|v| parse_amount("bathrooms", v))
            .transpose()?,
        sqft: event
            .sqft
            .as_deref()
            .map(|v| parse_amount("sqft", v))
            .transpose()?
            .unwrap_or(0.0),
        stage: INITIAL_STAGE.to_string(),
        image_urls: event.image_urls.iter().cloned().collect(),
        listing_url: event.listing_url.clone(),
    })
}

// ── Price drop ──────────────────────────────────────────────────────────

fn apply_price_drop(
    store: &mut dyn RecordsStore,
    event: &ExtractedEvent,
    fallback_timestamp: &str,
) -> ReconcileResult<ReconcileOutcome> {
    // An empty needle would match every deal.
    let street = required(event.street_address.as_deref(), "street_address")?;
    let new_price = parse_amount("price", required(event.price.as_deref(), "price")?)?;
    let price_change = event
        .price_change
        .as_deref()
        .map(|v| parse_amount("price_change", v))
        .transpose()?;
    let timestamp = event.timestamp.as_deref().unwrap_or(fallback_timestamp);

    let candidates = store.find_deals_by_address(street)?;
    let Some(deal) = most_recent(&candidates) else {
        tracing::warn!(address = street, "no deal found for price drop");
        return Ok(ReconcileOutcome::NoTarget {
            address: street.to_string(),
        });
    };

    let update = price_update(deal, new_price, price_change, timestamp);
    store.update_deal(&deal.id, &update)?;
    tracing::info!(
        deal = %deal.id,
        list_price = new_price,
        candidates = candidates.len(),
        "updated deal price"
    );

    Ok(ReconcileOutcome::Updated {
        deal_id: deal.id.clone(),
        list_price: new_price,
    })
}

/// Newest deal by creation time; the first one wins a tie.
pub fn most_recent(deals: &[DealRecord]) -> Option<&DealRecord> {
    let mut best: Option<&DealRecord> = None;
    for deal in deals {
        if best.is_none_or(|b| deal.created_time > b.created_time) {
            best = Some(deal);
        }
    }
    best
}

/// Fields for a price drop, with the new line appended to any prior history.
pub fn price_update(
    deal: &DealRecord,
    new_price: f64,
    price_change: Option<f64>,
    timestamp: &str,
) -> PriceUpdate {
    let line = format!("${} on {timestamp}", format_money(new_price));
    let price_history = match deal
        .price_history
        .as_deref()
        .map(str::trim_end)
        .filter(|h| !h.is_empty())
    {
        Some(prior) => format!("{prior}\n{line}"),
        None => line,
    };
    PriceUpdate {
        list_price: new_price,
        price_changes: price_change
            .map(|amount| format!("Reduced by ${} on {timestamp}", format_money(amount))),
        price_history,
    }
}

// ── Value parsing ───────────────────────────────────────────────────────

fn required<'a>(value: Option<&'a str>, field: &str) -> ReconcileResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ReconcileError::MissingField {
            field: field.to_string(),
        })
}

/// Parse a money or size figure: `$`, commas and whitespace are ignored.
pub fn parse_amount(field: &str, value: &str) -> ReconcileResult<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ReconcileError::InvalidField {
            field: field.to_string(),
            value: value.to_string(),
        })
}

fn parse_count(field: &str, value: &str) -> ReconcileResult<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ReconcileError::InvalidField {
            field: field.to_string(),
            value: value.to_string(),
        })
}

/// Render an amount as `1,234,567.89`.
pub fn format_money(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac}")
}

// ── Tests ───────────────────────────────────────────────────────────────
