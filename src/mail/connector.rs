//! Mail sources: trait + IMAP and mock implementations.
//!
//! `MailSource` lists the next batch of messages worth processing.
//! - `ImapSource` uses the `imap` crate for sync IMAPS access (feature `imap`).
//! - `MockSource` serves an in-memory mailbox for tests.
//!
//! Both sources pick their batch with [`select_batch`]: only messages the
//! selector wants count toward the batch limit, and messages that were
//! deferred by an earlier run yield their slot to fresh ones.

use crate::config::MailConfig;

use super::InboundMessage;
use super::error::MailResult;

/// Decides which messages a source should fetch.
pub trait MessageSelector {
    /// Already reconciled; never fetched again.
    fn is_processed(&self, id: &str) -> bool;

    /// Whether a message with this subject can be processed at all.
    fn wants(&self, subject: &str) -> bool;

    /// Failed or found no target earlier; fetched only when the batch has room.
    fn is_deferred(&self, id: &str) -> bool;
}

/// A mailbox that can enumerate unprocessed messages.
pub trait MailSource {
    /// At most one batch of unprocessed, wanted messages, oldest first.
    fn list_unprocessed(
        &mut self,
        selector: &dyn MessageSelector,
    ) -> MailResult<Vec<InboundMessage>>;
}

/// Header-level view of a message, known before its body is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader<K> {
    /// Source-specific position; larger is newer.
    pub key: K,
    pub id: String,
    pub subject: String,
}

/// Choose the keys of the next batch, returned oldest first.
///
/// Processed and unwanted messages are dropped. The rest are ranked fresh
/// before deferred, newest first within each group, and cut to `limit`, so
/// neither old noise nor repeatedly failing messages can starve new mail.
pub fn select_batch<K: Ord>(
    headers: Vec<MessageHeader<K>>,
    selector: &dyn MessageSelector,
    limit: usize,
) -> Vec<K> {
    let mut wanted: Vec<(bool, MessageHeader<K>)> = headers
        .into_iter()
        .filter(|h| !selector.is_processed(&h.id) && selector.wants(&h.subject))
        .map(|h| (selector.is_deferred(&h.id), h))
        .collect();
    wanted.sort_by(|(a_deferred, a), (b_deferred, b)| {
        a_deferred.cmp(b_deferred).then_with(|| b.key.cmp(&a.key))
    });
    wanted.truncate(limit);

    let mut keys: Vec<K> = wanted.into_iter().map(|(_, h)| h.key).collect();
    keys.sort();
    keys
}

// ── ImapSource ──────────────────────────────────────────────────────────

/// IMAP source using the `imap` crate (sync, TLS).
///
/// Opens the mailbox read-only with `EXAMINE`, pre-fetches headers to learn
/// Message-IDs and subjects, selects the batch, then fetches full bodies for
/// at most `batch_limit` messages.
pub struct ImapSource {
    config: MailConfig,
    password: String,
}

impl ImapSource {
    /// Create a new IMAP source (does not connect yet).
    pub fn new(config: MailConfig, password: String) -> Self {
        Self { config, password }
    }
}

impl std::fmt::Debug for ImapSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapSource")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("mailbox", &self.config.mailbox)
            .finish()
    }
}

#[cfg(feature = "imap")]
impl ImapSource {
    /// Establish a TLS connection and login.
    fn connect_and_login(
        &self,
    ) -> MailResult<imap::Session<native_tls::TlsStream<std::net::TcpStream>>> {
        use super::error::MailError;

        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| MailError::Connection {
                message: format!("TLS connector build failed: {e}"),
            })?;

        let addr = (&*self.config.host, self.config.port);
        let client = imap::connect(addr, &self.config.host, &tls).map_err(|e| {
            MailError::Connection {
                message: format!("IMAP connection failed: {e}"),
            }
        })?;

        client
            .login(&self.config.address, &self.password)
            .map_err(|e| MailError::Authentication {
                message: format!("IMAP login failed: {}", e.0),
            })
    }
}

#[cfg(feature = "imap")]
impl MailSource for ImapSource {
    fn list_unprocessed(
        &mut self,
        selector: &dyn MessageSelector,
    ) -> MailResult<Vec<InboundMessage>> {
        use super::error::MailError;
        use super::parser::{parse_headers, parse_message};

        let mut session = self.connect_and_login()?;
        let mailbox = self.config.mailbox.clone();

        session.examine(&mailbox).map_err(|e| MailError::Connection {
            message: format!("IMAP EXAMINE {mailbox} failed: {e}"),
        })?;

        let mut uids: Vec<u32> = session
            .uid_search("ALL")
            .map_err(|e| MailError::Connection {
                message: format!("IMAP UID SEARCH failed: {e}"),
            })?
            .into_iter()
            .collect();
        uids.sort_unstable();

        if uids.is_empty() {
            session.logout().ok();
            return Ok(Vec::new());
        }

        let uid_set = join_uids(&uids);
        let fetched = session
            .uid_fetch(&uid_set, "RFC822.HEADER")
            .map_err(|e| MailError::Connection {
                message: format!("IMAP UID FETCH headers failed: {e}"),
            })?;

        let mut headers = Vec::new();
        for fetch in fetched.iter() {
            let (Some(uid), Some(header)) = (fetch.uid, fetch.header()) else {
                continue;
            };
            let (id, subject) = parse_headers(&uid.to_string(), header);
            headers.push(MessageHeader {
                key: uid,
                id,
                subject,
            });
        }
        let pending = select_batch(headers, selector, self.config.batch_limit);

        tracing::info!(
            mailbox = %mailbox,
            total = uids.len(),
            pending = pending.len(),
            "scanned mailbox"
        );

        if pending.is_empty() {
            session.logout().ok();
            return Ok(Vec::new());
        }

        let fetches = session
            .uid_fetch(join_uids(&pending), "RFC822")
            .map_err(|e| MailError::Connection {
                message: format!("IMAP UID FETCH failed: {e}"),
            })?;

        let mut messages = Vec::new();
        for fetch in fetches.iter() {
            let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                continue;
            };
            match parse_message(&uid.to_string(), body) {
                Ok(msg) => messages.push(msg),
                // An unparseable message must not block the rest of the batch.
                Err(e) => tracing::warn!(uid, error = %e, "skipping unparseable message"),
            }
        }

        session.logout().ok();
        Ok(messages)
    }
}

#[cfg(not(feature = "imap"))]
impl MailSource for ImapSource {
    fn list_unprocessed(
        &mut self,
        _selector: &dyn MessageSelector,
    ) -> MailResult<Vec<InboundMessage>> {
        Err(super::error::MailError::Unavailable {
            message: "built without IMAP support".to_string(),
        })
    }
}

#[cfg(feature = "imap")]
fn join_uids(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

// ── MockSource ──────────────────────────────────────────────────────────

/// In-memory mailbox for unit testing.
///
/// Messages stay in the mailbox after listing, like a real inbox; only the
/// selector decides what counts as new. Inbox order is arrival order.
#[derive(Debug, Default)]
pub struct MockSource {
    inbox: Vec<InboundMessage>,
    batch_limit: Option<usize>,
}

impl MockSource {
    /// Create an empty mock mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of messages returned per listing.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    /// Deliver a message to the mailbox.
    pub fn push(&mut self, message: InboundMessage) {
        self.inbox.push(message);
    }

    pub fn len(&self) -> usize {
        self.inbox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inbox.is_empty()
    }
}

impl MailSource for MockSource {
    fn list_unprocessed(
        &mut self,
        selector: &dyn MessageSelector,
    ) -> MailResult<Vec<InboundMessage>> {
        let limit = self.batch_limit.unwrap_or(usize::MAX);
        let headers = self
            .inbox
            .iter()
            .enumerate()
            .map(|(key, m)| MessageHeader {
                key,
                id: m.id.clone(),
                subject: m.subject.clone(),
            })
            .collect();
        Ok(select_batch(headers, selector, limit)
            .into_iter()
            .map(|key| self.inbox[key].clone())
            .collect())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
