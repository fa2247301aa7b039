use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::output::{Offer, OutputSender};
use crate::feed::Item;
use crate::storage::DedupStore;

const SEEN_KEY_PREFIX: &str = "rss_reader:seen:";
const BOOTSTRAP_KEY_PREFIX: &str = "rss_reader:bootstrap:";

/// Retention of dedup records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupTtl {
    /// Items seen on a feed's first poll, never emitted.
    pub bootstrap: Duration,
    /// Items that were emitted downstream. Also used for the bootstrap marker.
    pub delivered: Duration,
}

impl Default for DedupTtl {
    fn default() -> Self {
        Self {
            bootstrap: Duration::from_secs(72 * 3600),
            delivered: Duration::from_secs(336 * 3600),
        }
    }
}

/// Where a feed stands in its dedup lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    /// No bootstrap has happened in this process.
    Uninitialized,
    /// A bootstrap is in progress.
    Bootstrapping,
    /// Baseline established; new items are emitted.
    Steady,
}

/// Counters for one fetch-and-dedup cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Items in the fetched document.
    pub fetched: usize,
    /// Items placed on the output stream.
    pub emitted: usize,
    /// New items lost to a full or closed output stream.
    pub dropped: usize,
    /// Items already recorded.
    pub skipped: usize,
    /// This cycle established the feed's baseline.
    pub bootstrapped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordClass {
    Bootstrap,
    Delivered,
}

/// Stored value of a dedup record.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeenRecord {
    guid: String,
    seen_at: DateTime<Utc>,
    class: RecordClass,
}

pub(crate) fn seen_key(feed_key: &str, dedup_key: &str) -> String {
    format!("{SEEN_KEY_PREFIX}{feed_key}:{dedup_key}")
}

pub(crate) fn bootstrap_key(feed_key: &str) -> String {
    format!("{BOOTSTRAP_KEY_PREFIX}{feed_key}")
}

enum Claim {
    Bootstrap,
    Steady,
    Busy,
}

/// Filters fetched batches down to items not delivered before.
///
/// The first batch of a feed only records a baseline. Every later batch emits
/// the items that have no record yet and records them. Store failures never
/// stop a cycle: an unreadable record counts as unseen, so the item is emitted
/// again rather than lost.
pub struct DedupEngine {
    store: Arc<dyn DedupStore>,
    ttl: DedupTtl,
    phases: Mutex<HashMap<String, FeedPhase>>,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn DedupStore>, ttl: DedupTtl) -> Self {
        Self {
            store,
            ttl,
            phases: Mutex::new(HashMap::new()),
        }
    }

    pub fn phase(&self, feed_key: &str) -> FeedPhase {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(feed_key)
            .copied()
            .unwrap_or(FeedPhase::Uninitialized)
    }

    /// Runs one batch through the feed's dedup state, offering new items to `output`.
    ///
    /// Items are handled in document order. An emitted item is recorded as
    /// delivered even when the output stream was full and dropped it.
    pub async fn process(
        &self,
        feed_key: &str,
        items: Vec<Item>,
        output: &OutputSender,
    ) -> CycleOutcome {
        match self.claim(feed_key) {
            Claim::Busy => {
                tracing::debug!(feed = %feed_key, "Bootstrap already in progress, skipping batch");
                CycleOutcome {
                    fetched: items.len(),
                    ..Default::default()
                }
            }
            Claim::Steady => self.deliver_new(feed_key, items, output).await,
            Claim::Bootstrap => {
                let claim = BootstrapClaim::new(&self.phases, feed_key);
                if self.has_bootstrap_marker(feed_key).await {
                    tracing::info!(feed = %feed_key, "Resuming feed from previous baseline");
                    claim.settle();
                    return self.deliver_new(feed_key, items, output).await;
                }
                let outcome = self.bootstrap(feed_key, items).await;
                claim.settle();
                outcome
            }
        }
    }

    /// Atomically moves an uninitialized feed into `Bootstrapping`.
    fn claim(&self, feed_key: &str) -> Claim {
        let mut phases = self.phases.lock().unwrap_or_else(PoisonError::into_inner);
        match phases.get(feed_key) {
            None | Some(FeedPhase::Uninitialized) => {
                phases.insert(feed_key.to_string(), FeedPhase::Bootstrapping);
                Claim::Bootstrap
            }
            Some(FeedPhase::Bootstrapping) => Claim::Busy,
            Some(FeedPhase::Steady) => Claim::Steady,
        }
    }

    async fn has_bootstrap_marker(&self, feed_key: &str) -> bool {
        match self.store.get(&bootstrap_key(feed_key)).await {
            Ok(marker) => marker.is_some(),
            Err(e) => {
                tracing::warn!(feed = %feed_key, error = %e, "Failed to read bootstrap marker");
                false
            }
        }
    }

    async fn bootstrap(&self, feed_key: &str, items: Vec<Item>) -> CycleOutcome {
        let mut outcome = CycleOutcome {
            fetched: items.len(),
            bootstrapped: true,
            ..Default::default()
        };
        let mut marked = HashSet::new();

        for item in &items {
            let dedup_key = item.dedup_key();
            if !marked.insert(dedup_key.clone()) {
                continue;
            }
            let key = seen_key(feed_key, &dedup_key);

            // Keep longer-lived delivered records from an earlier run intact.
            if let Ok(Some(_)) = self.store.get(&key).await {
                outcome.skipped += 1;
                continue;
            }
            self.record(&key, item, RecordClass::Bootstrap, self.ttl.bootstrap)
                .await;
        }

        self.write_marker(feed_key).await;
        tracing::info!(
            feed = %feed_key,
            items = marked.len(),
            "Feed bootstrapped, existing items will not be emitted"
        );
        outcome
    }

    async fn deliver_new(
        &self,
        feed_key: &str,
        items: Vec<Item>,
        output: &OutputSender,
    ) -> CycleOutcome {
        let mut outcome = CycleOutcome {
            fetched: items.len(),
            ..Default::default()
        };
        let mut handled = HashSet::new();

        for item in items {
            let key = seen_key(feed_key, &item.dedup_key());
            if !handled.insert(key.clone()) {
                outcome.skipped += 1;
                continue;
            }

            match self.store.get(&key).await {
                Ok(Some(_)) => {
                    tracing::debug!(feed = %feed_key, guid = %item.guid, "Already seen");
                    outcome.skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        feed = %feed_key,
                        guid = %item.guid,
                        error = %e,
                        "Dedup lookup failed, treating item as new"
                    );
                }
            }

            let record = seen_record(&item, RecordClass::Delivered);
            match output.offer(item) {
                Offer::Sent => outcome.emitted += 1,
                Offer::Dropped => {
                    tracing::warn!(feed = %feed_key, guid = %record.guid, "Output stream full, item dropped");
                    outcome.dropped += 1;
                }
                Offer::Closed => {
                    tracing::warn!(feed = %feed_key, guid = %record.guid, "Output stream closed, item dropped");
                    outcome.dropped += 1;
                }
            }
            self.store_record(&key, &record, self.ttl.delivered).await;
        }

        self.write_marker(feed_key).await;
        if outcome.emitted > 0 {
            tracing::info!(feed = %feed_key, emitted = outcome.emitted, "New items emitted");
        }
        outcome
    }

    async fn record(&self, key: &str, item: &Item, class: RecordClass, ttl: Duration) {
        self.store_record(key, &seen_record(item, class), ttl).await;
    }

    async fn store_record(&self, key: &str, record: &SeenRecord, ttl: Duration) {
        let value = match serde_json::to_vec(record) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode dedup record");
                return;
            }
        };
        if let Err(e) = self.store.set(key, &value, ttl).await {
            tracing::warn!(key = %key, error = %e, "Failed to write dedup record");
        }
    }

    /// Refreshes the durable marker that lets a restarted process skip bootstrap.
    async fn write_marker(&self, feed_key: &str) {
        let stamp = Utc::now().to_rfc3339();
        if let Err(e) = self
            .store
            .set(&bootstrap_key(feed_key), stamp.as_bytes(), self.ttl.delivered)
            .await
        {
            tracing::warn!(feed = %feed_key, error = %e, "Failed to write bootstrap marker");
        }
    }
}

/// A held `Bootstrapping` phase. Dropped unsettled, the feed goes back to
/// `Uninitialized` so the next batch can claim it again.
struct BootstrapClaim<'a> {
    phases: &'a Mutex<HashMap<String, FeedPhase>>,
    feed_key: &'a str,
    settled: bool,
}

impl<'a> BootstrapClaim<'a> {
    fn new(phases: &'a Mutex<HashMap<String, FeedPhase>>, feed_key: &'a str) -> Self {
        Self {
            phases,
            feed_key,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.feed_key.to_string(), FeedPhase::Steady);
        self.settled = true;
    }
}

impl Drop for BootstrapClaim<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut phases = self.phases.lock().unwrap_or_else(PoisonError::into_inner);
        if phases.get(self.feed_key) == Some(&FeedPhase::Bootstrapping) {
            phases.insert(self.feed_key.to_string(), FeedPhase::Uninitialized);
        }
    }
}

fn seen_record(item: &Item, class: RecordClass) -> SeenRecord {
    SeenRecord {
        guid: item.guid.clone(),
        seen_at: Utc::now(),
        class,
    }
}
