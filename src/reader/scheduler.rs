use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::dedup::{CycleOutcome, DedupEngine};
use super::output::OutputSender;
use super::ReaderError;
use crate::feed::{fetch_once, FetchError};

/// A feed to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRegistration {
    /// Unique key of the registration.
    pub url: String,
    /// Identity used for dedup records. Defaults to the url.
    pub name: Option<String>,
    pub poll_interval: Duration,
}

impl FeedRegistration {
    pub fn new(url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            url: url.into(),
            name: None,
            poll_interval,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Key under which this feed's dedup state is stored.
    pub fn feed_key(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// Result of a successful registration.
#[derive(Debug)]
pub struct Registration {
    /// The feed's first cycle, run before the poll interval starts.
    pub first_cycle: Result<CycleOutcome, FetchError>,
}

struct Registry {
    /// Live registrations, url to feed key.
    feeds: HashMap<String, String>,
    /// Taken on shutdown so the stream closes once every loop has exited.
    output: Option<OutputSender>,
}

/// Owns the per-feed poll loops.
pub(crate) struct Scheduler {
    client: reqwest::Client,
    fetch_timeout: Duration,
    dedup: DedupEngine,
    registry: Mutex<Registry>,
    stopped: AtomicBool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    pub(crate) fn new(
        client: reqwest::Client,
        fetch_timeout: Duration,
        dedup: DedupEngine,
        output: OutputSender,
    ) -> Self {
        Self {
            client,
            fetch_timeout,
            dedup,
            registry: Mutex::new(Registry {
                feeds: HashMap::new(),
                output: Some(output),
            }),
            stopped: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub(crate) fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn active_feeds(&self) -> Vec<String> {
        let mut feeds: Vec<String> = self.registry().feeds.keys().cloned().collect();
        feeds.sort();
        feeds
    }

    /// Registers a feed, runs its first cycle, then keeps polling it.
    ///
    /// The url and feed key checks and the insert happen under one lock, so
    /// two concurrent callers for the same feed cannot both succeed. The whole
    /// lifetime of the feed, first cycle included, runs in one tracked task:
    /// dropping the returned future only discards the first cycle's result.
    /// The task runs until `cancel` fires (the feed is deregistered) or the
    /// scheduler shuts down.
    pub(crate) async fn register(
        self: &Arc<Self>,
        feed: FeedRegistration,
        cancel: CancellationToken,
    ) -> Result<Registration, ReaderError> {
        validate_url(&feed.url)?;
        if feed.poll_interval.is_zero() {
            return Err(ReaderError::InvalidInterval);
        }

        let first_cycle = {
            let mut registry = self.registry();
            if self.is_stopped() {
                return Err(ReaderError::EngineStopped);
            }
            let Some(output) = registry.output.clone() else {
                return Err(ReaderError::EngineStopped);
            };
            if registry.feeds.contains_key(&feed.url) {
                return Err(ReaderError::AlreadyRegistered(feed.url));
            }
            if registry.feeds.values().any(|key| key == feed.feed_key()) {
                return Err(ReaderError::FeedKeyInUse(feed.feed_key().to_string()));
            }
            registry
                .feeds
                .insert(feed.url.clone(), feed.feed_key().to_string());

            tracing::info!(
                feed = %feed.url,
                interval_secs = feed.poll_interval.as_secs(),
                "Feed registered"
            );

            let (tx, rx) = oneshot::channel();
            let scheduler = Arc::clone(self);
            self.tracker.spawn(async move {
                let first = scheduler.run_cycle(&feed, &cancel, &output).await;
                log_cycle(&feed, &first);
                // The caller may have stopped waiting.
                let _ = tx.send(first);
                scheduler.poll_loop(feed, cancel, output).await;
            });
            rx
        };

        let first_cycle = first_cycle.await.unwrap_or(Err(FetchError::Cancelled));
        Ok(Registration { first_cycle })
    }

    async fn poll_loop(
        &self,
        feed: FeedRegistration,
        cancel: CancellationToken,
        output: OutputSender,
    ) {
        let period = feed.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.deregister(&feed.url);
                    tracing::info!(feed = %feed.url, "Feed deregistered");
                    return;
                }
                _ = self.shutdown.cancelled() => {
                    tracing::debug!(feed = %feed.url, "Poll loop exiting on shutdown");
                    return;
                }
                _ = ticker.tick() => {
                    tracing::debug!(feed = %feed.url, "Polling feed");
                    let result = self.run_cycle(&feed, &cancel, &output).await;
                    log_cycle(&feed, &result);
                }
            }
        }
    }

    async fn run_cycle(
        &self,
        feed: &FeedRegistration,
        cancel: &CancellationToken,
        output: &OutputSender,
    ) -> Result<CycleOutcome, FetchError> {
        let (_, items) = fetch_once(&self.client, &feed.url, cancel, self.fetch_timeout).await?;
        Ok(self.dedup.process(feed.feed_key(), items, output).await)
    }

    fn deregister(&self, url: &str) {
        self.registry().feeds.remove(url);
    }

    /// Stops every loop and closes the output stream. Only the first call succeeds.
    pub(crate) async fn shutdown(&self) -> Result<(), ReaderError> {
        {
            let mut registry = self.registry();
            if self.stopped.swap(true, Ordering::AcqRel) {
                return Err(ReaderError::AlreadyStopped);
            }
            registry.output = None;
        }

        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        self.registry().feeds.clear();
        tracing::info!("Reader stopped");
        Ok(())
    }

    /// Signals loops to exit without waiting for them.
    pub(crate) fn abort(&self) {
        self.shutdown.cancel();
    }
}

fn validate_url(raw: &str) -> Result<(), ReaderError> {
    let url = url::Url::parse(raw).map_err(|e| ReaderError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ReaderError::InvalidUrl(format!(
            "{raw}: unsupported scheme '{other}'"
        ))),
    }
}

fn log_cycle(feed: &FeedRegistration, result: &Result<CycleOutcome, FetchError>) {
    match result {
        Ok(outcome) => tracing::debug!(
            feed = %feed.url,
            fetched = outcome.fetched,
            emitted = outcome.emitted,
            dropped = outcome.dropped,
            skipped = outcome.skipped,
            "Cycle complete"
        ),
        Err(FetchError::NoItemsFound) => {
            tracing::debug!(feed = %feed.url, "Feed has no items");
        }
        Err(FetchError::Cancelled) => {
            tracing::debug!(feed = %feed.url, "Cycle cancelled");
        }
        Err(e) => tracing::error!(feed = %feed.url, error = %e, "Cycle failed"),
    }
}
