//! Feed polling engine.
//!
//! [`RssReader`] ties the pieces together:
//!
//! - [`scheduler`] - One poll loop per registered feed, with a shared registry
//! - [`dedup`] - Per-feed bootstrap and "seen" bookkeeping against a [`DedupStore`]
//! - [`output`] - The bounded stream new items are offered to
//!
//! # Example
//!
//! ```ignore
//! use rss_relay::reader::{FeedRegistration, ReaderOptions, RssReader};
//! use rss_relay::storage::MemoryStore;
//!
//! let reader = RssReader::new(Arc::new(MemoryStore::new()), ReaderOptions::default())?;
//! let mut output = reader.take_output().unwrap();
//! reader
//!     .start_parsing(FeedRegistration::new(url, Duration::from_secs(60)), CancellationToken::new())
//!     .await?;
//! while let Some(item) = output.recv().await {
//!     println!("{}", item.title);
//! }
//! ```

mod dedup;
mod output;
mod scheduler;

pub use dedup::{CycleOutcome, DedupEngine, DedupTtl, FeedPhase};
pub use output::{output_channel, Offer, OutputSender, OutputStream, DEFAULT_OUTPUT_CAPACITY};
pub use scheduler::{FeedRegistration, Registration};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::feed::{
    build_http_client, fetch_channel, fetch_once, Channel, FetchError, Item, DEFAULT_FETCH_TIMEOUT,
};
use crate::storage::DedupStore;
use scheduler::Scheduler;

/// Errors returned by [`RssReader`] operations.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("reader has been stopped")]
    EngineStopped,
    #[error("feed already registered: {0}")]
    AlreadyRegistered(String),
    #[error("feed key already in use by another url: {0}")]
    FeedKeyInUse(String),
    #[error("reader already stopped")]
    AlreadyStopped,
    #[error("invalid feed url: {0}")]
    InvalidUrl(String),
    #[error("poll interval must be greater than zero")]
    InvalidInterval,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Tunables for [`RssReader`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub output_capacity: usize,
    /// Deadline for a single fetch, independent of any poll interval.
    pub fetch_timeout: Duration,
    pub ttl: DedupTtl,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            ttl: DedupTtl::default(),
        }
    }
}

/// Polls feeds and streams items that were not delivered before.
///
/// All registered feeds share one output stream. Stopping the reader waits for
/// every poll loop to finish, then closes the stream; consumers see `None`
/// after the remaining buffered items.
pub struct RssReader {
    scheduler: Arc<Scheduler>,
    output: Mutex<Option<OutputStream>>,
}

impl RssReader {
    /// Creates a reader with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Client`] if the HTTP client cannot be built.
    pub fn new(store: Arc<dyn DedupStore>, options: ReaderOptions) -> Result<Self, ReaderError> {
        let client = build_http_client(options.fetch_timeout).map_err(ReaderError::Client)?;
        Ok(Self::with_client(client, store, options))
    }

    pub fn with_client(
        client: reqwest::Client,
        store: Arc<dyn DedupStore>,
        options: ReaderOptions,
    ) -> Self {
        let (sender, stream) = output_channel(options.output_capacity);
        let dedup = DedupEngine::new(store, options.ttl);
        Self {
            scheduler: Arc::new(Scheduler::new(
                client,
                options.fetch_timeout,
                dedup,
                sender,
            )),
            output: Mutex::new(Some(stream)),
        }
    }

    /// Registers a feed and starts polling it.
    ///
    /// One cycle runs before this returns; its result is reported in
    /// [`Registration::first_cycle`]. A failed first cycle does not undo the
    /// registration, the loop keeps polling on its interval. The feed stays
    /// registered even if this future is dropped before it resolves.
    /// Cancelling `cancel` deregisters the feed, after which the same url may
    /// be registered again.
    ///
    /// # Errors
    ///
    /// - [`ReaderError::EngineStopped`] after [`RssReader::stop`]
    /// - [`ReaderError::AlreadyRegistered`] if the url has a live registration
    /// - [`ReaderError::FeedKeyInUse`] if another url is registered under the same name
    /// - [`ReaderError::InvalidUrl`] / [`ReaderError::InvalidInterval`] for bad input
    pub async fn start_parsing(
        &self,
        feed: FeedRegistration,
        cancel: CancellationToken,
    ) -> Result<Registration, ReaderError> {
        self.scheduler.register(feed, cancel).await
    }

    /// Fetches a feed once and returns all of its items, bypassing dedup.
    pub async fn parse_once(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Item>, FetchError> {
        fetch_once(
            self.scheduler.client(),
            url,
            cancel,
            self.scheduler.fetch_timeout(),
        )
        .await
        .map(|(_, items)| items)
    }

    /// Fetches a feed's channel metadata.
    pub async fn get_channel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Channel, FetchError> {
        fetch_channel(
            self.scheduler.client(),
            url,
            cancel,
            self.scheduler.fetch_timeout(),
        )
        .await
    }

    /// Hands out the output stream. Returns `None` after the first call.
    pub fn take_output(&self) -> Option<OutputStream> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Stops all poll loops, waits for them, then closes the output stream.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::AlreadyStopped`] on every call after the first.
    pub async fn stop(&self) -> Result<(), ReaderError> {
        self.scheduler.shutdown().await
    }

    pub fn is_stopped(&self) -> bool {
        self.scheduler.is_stopped()
    }

    /// Urls with a live registration, sorted.
    pub fn active_feeds(&self) -> Vec<String> {
        self.scheduler.active_feeds()
    }

    /// Dedup phase of a feed, by its feed key (name, or url when unnamed).
    pub fn feed_phase(&self, feed_key: &str) -> FeedPhase {
        self.scheduler.dedup().phase(feed_key)
    }
}

impl Drop for RssReader {
    fn drop(&mut self) {
        // Loops hold their own handle to the scheduler; make sure they exit.
        self.scheduler.abort();
    }
}
