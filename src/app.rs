use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::feed::Channel;
use crate::publish::Publisher;
use crate::reader::{FeedRegistration, RssReader};

/// Totals for one relay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: usize,
    pub failed: usize,
}

/// Moves items from the reader's output stream to a publisher.
pub struct Relay<P> {
    reader: Arc<RssReader>,
    publisher: P,
    feed_code: String,
    is_testing: bool,
}

impl<P: Publisher> Relay<P> {
    pub fn new(
        reader: Arc<RssReader>,
        publisher: P,
        feed_code: impl Into<String>,
        is_testing: bool,
    ) -> Self {
        Self {
            reader,
            publisher,
            feed_code: feed_code.into(),
            is_testing,
        }
    }

    /// Registers `feed`, then delivers every emitted item until the reader stops.
    ///
    /// Channel metadata is fetched once at startup. A delivery failure is
    /// logged and the relay moves on to the next item.
    ///
    /// # Errors
    ///
    /// Fails if the output stream was already taken, the registration is
    /// rejected, or the channel metadata cannot be fetched. In the last two
    /// cases the reader is stopped before returning.
    pub async fn run(&self, feed: FeedRegistration, cancel: CancellationToken) -> Result<RelayStats> {
        let mut output = self
            .reader
            .take_output()
            .context("reader output stream already taken")?;
        let url = feed.url.clone();

        if let Err(e) = self.reader.start_parsing(feed, cancel.clone()).await {
            self.stop_reader().await;
            return Err(e).with_context(|| format!("failed to register feed {url}"));
        }

        let channel: Channel = match self.reader.get_channel(&url, &cancel).await {
            Ok(channel) => channel,
            Err(e) => {
                self.stop_reader().await;
                return Err(e).with_context(|| format!("failed to fetch channel metadata for {url}"));
            }
        };
        tracing::info!(feed = %url, channel = %channel.title, "Relaying feed");

        let mut stats = RelayStats::default();
        while let Some(item) = output.recv().await {
            match self
                .publisher
                .deliver(&item, &channel, self.is_testing, &self.feed_code)
                .await
            {
                Ok(()) => {
                    tracing::debug!(guid = %item.guid, "Item delivered");
                    stats.delivered += 1;
                }
                Err(e) => {
                    tracing::error!(guid = %item.guid, error = %e, "Failed to deliver item");
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Output stream closed, relay finished"
        );
        Ok(stats)
    }

    async fn stop_reader(&self) {
        if let Err(e) = self.reader.stop().await {
            tracing::debug!(error = %e, "Reader was already stopped");
        }
    }
}
