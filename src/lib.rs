// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # listing-intake
//!
//! Turns real-estate listing notification emails into deal records.
//!
//! ## Architecture
//!
//! - **Templates** (`template`): ordered catalog of subject triggers + field patterns
//! - **Extraction** (`extract`): per-field regex extraction and image URL collection
//! - **Matching** (`matcher`): similarity-ratio address resolution against a property snapshot
//! - **Reconciliation** (`reconcile`): create a deal or append a price change
//! - **Collaborators** (`mail`, `store`, `ledger`): IMAP, Airtable, processed-message ledger
//! - **Engine** (`pipeline`): batch runs with per-message isolation
//!
//! ## Library usage
//!
//! ```no_run
//! use listing_intake::ledger::MemoryLedger;
//! use listing_intake::mail::MockSource;
//! use listing_intake::pipeline::Intake;
//! use listing_intake::store::MemoryStore;
//! use listing_intake::template::TemplateCatalog;
//!
//! let catalog = TemplateCatalog::load_dir(std::path::Path::new("templates")).unwrap();
//! let mut intake = Intake::new(catalog, MemoryStore::new()).unwrap();
//! let summary = intake
//!     .run_batch(&mut MockSource::new(), &mut MemoryLedger::new())
//!     .unwrap();
//! println!("{summary}");
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod mail;
pub mod matcher;
pub mod pipeline;
pub mod reconcile;
pub mod store;
pub mod template;
