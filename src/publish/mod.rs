//! Delivery of relayed items to the downstream bus.
//!
//! The relay only depends on [`Publisher`]. [`HttpPublisher`] POSTs each item
//! wrapped in an [`Envelope`] to an ingest endpoint and retries transient
//! failures itself, so callers treat an error as final.

mod envelope;
mod http;

pub use envelope::{ChannelInfo, Envelope};
pub use http::{HttpPublisher, DEFAULT_ATTEMPTS, DEFAULT_ATTEMPT_TIMEOUT};

use async_trait::async_trait;
use thiserror::Error;

use crate::feed::{Channel, Item};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    #[error("Delivery failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl PublishError {
    /// Returns true if this error is transient and the request should be retried.
    fn is_retryable(&self) -> bool {
        match self {
            PublishError::Timeout | PublishError::Network(_) => true,
            PublishError::HttpStatus(status) => *status >= 500 || *status == 429,
            PublishError::Serialize(_) | PublishError::RetriesExhausted { .. } => false,
        }
    }
}

/// Sink for items leaving the relay.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Delivers one item with its feed's channel metadata.
    ///
    /// Implementations retry on their own; an `Err` is terminal for this item.
    async fn deliver(
        &self,
        item: &Item,
        channel: &Channel,
        is_testing: bool,
        feed_code: &str,
    ) -> Result<(), PublishError>;
}
