//! The intake engine: classify, extract, reconcile, then commit to the ledger.
//!
//! Per message: `received → classified → extracted → {created | updated |
//! dropped} → ledger-committed`. A message enters the ledger only after a
//! store mutation succeeded; every other path leaves it eligible for the next
//! run. Failures are isolated per message and collected in a [`RunSummary`].
//!
//! Sources are asked only for messages whose subject classifies, and messages
//! that failed or found no target are deferred behind fresh mail, so neither
//! kind can fill every batch.

use std::collections::HashSet;

use crate::error::{IntakeResult, ReconcileResult};
use crate::extract::{ExtractedEvent, extract};
use crate::ledger::MessageLedger;
use crate::mail::{InboundMessage, MailSource, MessageSelector};
use crate::matcher::PropertySnapshot;
use crate::reconcile::{ReconcileOutcome, reconcile};
use crate::store::RecordsStore;
use crate::template::TemplateCatalog;

/// Result of processing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// No template matched the subject.
    Unclassified,
    Reconciled(ReconcileOutcome),
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub listed: usize,
    pub created: usize,
    pub linked: usize,
    pub updated: usize,
    pub unclassified: usize,
    pub no_target: usize,
    pub already_processed: usize,
    /// `(message id, error)` for every message that failed.
    pub failed: Vec<(String, String)>,
}

impl RunSummary {
    /// Messages committed to the ledger this run.
    pub fn committed(&self) -> usize {
        self.created + self.updated
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} listed: {} created ({} linked), {} updated, {} unclassified, \
             {} without target, {} already processed, {} failed",
            self.listed,
            self.created,
            self.linked,
            self.updated,
            self.unclassified,
            self.no_target,
            self.already_processed,
            self.failed.len()
        )
    }
}

// ── Batch selection ─────────────────────────────────────────────────────

/// Selector combining the ledger, the catalog and the deferred set.
struct BatchSelector<'a> {
    ledger: &'a dyn MessageLedger,
    catalog: &'a TemplateCatalog,
    deferred: &'a HashSet<String>,
}

impl MessageSelector for BatchSelector<'_> {
    fn is_processed(&self, id: &str) -> bool {
        self.ledger.contains(id)
    }

    fn wants(&self, subject: &str) -> bool {
        self.catalog.classify(subject).is_some()
    }

    fn is_deferred(&self, id: &str) -> bool {
        self.deferred.contains(id)
    }
}

// ── Intake ──────────────────────────────────────────────────────────────

/// Single-threaded reconciliation engine over one records store.
pub struct Intake<S: RecordsStore> {
    catalog: TemplateCatalog,
    snapshot: PropertySnapshot,
    store: S,
    /// Ids that failed or found no target; listed after fresh mail.
    deferred: HashSet<String>,
}

impl<S: RecordsStore> Intake<S> {
    /// Create an engine, loading the property snapshot from `store`.
    pub fn new(catalog: TemplateCatalog, store: S) -> IntakeResult<Self> {
        let snapshot = PropertySnapshot::load(&store)?;
        Ok(Self::with_snapshot(catalog, snapshot, store))
    }

    /// Create an engine with an explicitly supplied snapshot.
    pub fn with_snapshot(catalog: TemplateCatalog, snapshot: PropertySnapshot, store: S) -> Self {
        Self {
            catalog,
            snapshot,
            store,
            deferred: HashSet::new(),
        }
    }

    /// Reload the property snapshot.
    ///
    /// Properties created after the engine started are not matched until
    /// this is called.
    pub fn refresh_snapshot(&mut self) -> IntakeResult<()> {
        self.snapshot = PropertySnapshot::load(&self.store)?;
        Ok(())
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn snapshot(&self) -> &PropertySnapshot {
        &self.snapshot
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Whether `id` failed or found no target in an earlier batch.
    pub fn is_deferred(&self, id: &str) -> bool {
        self.deferred.contains(id)
    }

    /// Classify and extract without touching the store.
    pub fn preview(&self, message: &InboundMessage) -> Option<ExtractedEvent> {
        let template = self.catalog.classify(&message.subject)?;
        Some(extract(&message.text(), template))
    }

    /// Process one message against the store. Does not touch the ledger.
    pub fn process(&mut self, message: &InboundMessage) -> ReconcileResult<MessageOutcome> {
        let Some(event) = self.preview(message) else {
            tracing::info!(message_id = %message.id, subject = %message.subject, "no template matched");
            return Ok(MessageOutcome::Unclassified);
        };
        tracing::debug!(message_id = %message.id, trigger = %event.trigger, "extracted event");

        let timestamp = message
            .date
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        let outcome = reconcile(&mut self.store, &self.snapshot, &event, &timestamp)?;
        Ok(MessageOutcome::Reconciled(outcome))
    }

    /// Process one batch of unprocessed messages from `source`.
    ///
    /// Listing failures abort the run. Per-message failures are logged and
    /// recorded; the batch continues.
    pub fn run_batch(
        &mut self,
        source: &mut dyn MailSource,
        ledger: &mut dyn MessageLedger,
    ) -> IntakeResult<RunSummary> {
        let messages = source.list_unprocessed(&BatchSelector {
            ledger: &*ledger,
            catalog: &self.catalog,
            deferred: &self.deferred,
        })?;
        let mut summary = RunSummary {
            listed: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            if ledger.contains(&message.id) {
                summary.already_processed += 1;
                continue;
            }

            let outcome = match self.process(message) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(message_id = %message.id, subject = %message.subject, error = %e, "failed to process message");
                    summary.failed.push((message.id.clone(), e.to_string()));
                    self.deferred.insert(message.id.clone());
                    continue;
                }
            };

            match &outcome {
                MessageOutcome::Unclassified => summary.unclassified += 1,
                MessageOutcome::Reconciled(ReconcileOutcome::NoTarget { .. }) => {
                    summary.no_target += 1;
                    self.deferred.insert(message.id.clone());
                }
                MessageOutcome::Reconciled(ReconcileOutcome::Created { property_id, .. }) => {
                    summary.created += 1;
                    if property_id.is_some() {
                        summary.linked += 1;
                    }
                }
                MessageOutcome::Reconciled(ReconcileOutcome::Updated { .. }) => {
                    summary.updated += 1
                }
            }

            if let MessageOutcome::Reconciled(reconciled) = &outcome {
                if reconciled.is_committed() {
                    if let Err(e) = ledger.append(&message.id) {
                        // The mutation happened; a retry may duplicate it.
                        tracing::error!(message_id = %message.id, error = %e, "ledger append failed");
                        summary.failed.push((message.id.clone(), e.to_string()));
                        self.deferred.insert(message.id.clone());
                        continue;
                    }
                    self.deferred.remove(&message.id);
                    tracing::info!(message_id = %message.id, subject = %message.subject, "processed message");
                }
            }
        }

        tracing::info!(
            listed = summary.listed,
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed.len(),
            "run complete"
        );
        Ok(summary)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::mail::MockSource;
    use crate::matcher::PropertyRecord;
    use crate::store::MemoryStore;
    use crate::template::tests::{new_listing_def, price_drop_def};

    fn catalog() -> TemplateCatalog {
        TemplateCatalog::from_defs(&[new_listing_def(), price_drop_def()]).unwrap()
    }

    fn listing(id: &str) -> InboundMessage {
        InboundMessage {
            id: id.into(),
            subject: "New Listing: 123 Main St".into(),
            body: "123 Main St, Springfield, IL 62704\nListed at $450,000\n".into(),
            date: Some("2024-05-01T10:00:00+00:00".into()),
        }
    }

    /// Hands out its whole inbox, ignoring the selector.
    struct Unfiltered(Vec<InboundMessage>);

    impl MailSource for Unfiltered {
        fn list_unprocessed(
            &mut self,
            _selector: &dyn MessageSelector,
        ) -> crate::mail::MailResult<Vec<InboundMessage>> {
            Ok(self.0.clone())
        }
    }

    fn digest(id: &str) -> InboundMessage {
        InboundMessage {
            id: id.into(),
            subject: "Your weekly digest".into(),
            body: String::new(),
            date: None,
        }
    }

    #[test]
    fn unclassified_messages_stay_unprocessed() {
        let mut intake = Intake::new(catalog(), MemoryStore::new()).unwrap();
        let mut source = Unfiltered(vec![digest("<digest@x>")]);
        let mut ledger = MemoryLedger::new();
        let summary = intake.run_batch(&mut source, &mut ledger).unwrap();
        assert_eq!(summary.unclassified, 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn unclassifiable_mail_does_not_fill_the_batch() {
        let mut intake = Intake::new(catalog(), MemoryStore::new()).unwrap();
        let mut source = MockSource::new().with_batch_limit(2);
        source.push(digest("<digest-1@x>"));
        source.push(digest("<digest-2@x>"));
        source.push(digest("<digest-3@x>"));
        source.push(listing("<m@x>"));
        let mut ledger = MemoryLedger::new();

        let summary = intake.run_batch(&mut source, &mut ledger).unwrap();
        assert_eq!(summary.listed, 1);
        assert_eq!(summary.created, 1);
        assert!(ledger.contains("<m@x>"));
    }

    #[test]
    fn failing_messages_do_not_starve_the_queue() {
        let mut intake = Intake::new(catalog(), MemoryStore::new()).unwrap();
        let mut source = MockSource::new().with_batch_limit(1);
        let mut broken = |id: &str| {
            let mut m = listing(id);
            m.body = "123 Main St, Springfield, IL 62704\nprice on request".into();
            source.push(m);
        };
        broken("<bad-1@x>");
        broken("<bad-2@x>");
        let mut ledger = MemoryLedger::new();

        let first = intake.run_batch(&mut source, &mut ledger).unwrap();
        assert_eq!(first.failed[0].0, "<bad-2@x>");
        assert!(intake.is_deferred("<bad-2@x>"));

        // The fresh failure goes ahead of the deferred one.
        let second = intake.run_batch(&mut source, &mut ledger).unwrap();
        assert_eq!(second.failed[0].0, "<bad-1@x>");

        source.push(listing("<good@x>"));
        let third = intake.run_batch(&mut source, &mut ledger).unwrap();
        assert_eq!(third.created, 1);
        assert!(ledger.contains("<good@x>"));
    }

    #[test]
    fn failure_is_isolated() {
        let mut intake = Intake::new(catalog(), MemoryStore::new()).unwrap();
        let mut source = MockSource::new();
        let mut bad = listing("<bad@x>");
        bad.body = "123 Main St, Springfield, IL 62704\nprice on request".into();
        source.push(bad);
        source.push(listing("<good@x>"));

        let mut ledger = MemoryLedger::new();
        let summary = intake.run_batch(&mut source, &mut ledger).unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "<bad@x>");
        assert_eq!(summary.created, 1);
        assert!(ledger.contains("<good@x>"));
        assert!(!ledger.contains("<bad@x>"));
    }

    #[test]
    fn store_failure_leaves_message_for_retry() {
        let mut store = MemoryStore::new();
        store.fail_creates(true);
        let mut intake = Intake::new(catalog(), store).unwrap();
        let mut source = MockSource::new();
        source.push(listing("<m@x>"));
        let mut ledger = MemoryLedger::new();

        let summary = intake.run_batch(&mut source, &mut ledger).unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert!(ledger.is_empty());

        intake.store_mut().fail_creates(false);
        let summary = intake.run_batch(&mut source, &mut ledger).unwrap();
        assert_eq!(summary.created, 1);
        assert!(ledger.contains("<m@x>"));
    }

    #[test]
    fn ledger_is_rechecked_even_if_source_does_not_filter() {
        let mut intake = Intake::new(catalog(), MemoryStore::new()).unwrap();
        let mut source = Unfiltered(vec![listing("<m@x>")]);
        let mut ledger = MemoryLedger::new();
        intake.run_batch(&mut source, &mut ledger).unwrap();
        let second = intake.run_batch(&mut source, &mut ledger).unwrap();
        assert_eq!(second.already_processed, 1);
        assert_eq!(intake.store().deals().len(), 1);
    }

    #[test]
    fn snapshot_is_stale_until_refreshed() {
        let mut intake = Intake::new(catalog(), MemoryStore::new()).unwrap();
        assert!(intake.snapshot().is_empty());

        *intake.store_mut() =
            MemoryStore::with_properties(vec![PropertyRecord::new("p1", Some("123 Main St"))]);
        assert!(intake.snapshot().is_empty());

        intake.refresh_snapshot().unwrap();
        assert_eq!(intake.snapshot().len(), 1);
    }

    #[test]
    fn summary_display_mentions_counts() {
        let summary = RunSummary {
            listed: 3,
            created: 2,
            linked: 1,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("3 listed"));
        assert!(text.contains("2 created (1 linked)"));
        assert_eq!(summary.committed(), 2);
    }
}
