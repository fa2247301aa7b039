//! Feed fetching, parsing and date normalization.
//!
//! This module turns a feed URL into channel metadata and an ordered list of
//! items:
//!
//! - [`fetcher`] - One HTTP GET per call, bounded by a deadline and a cancellation token
//! - [`parser`] - Structural RSS 2.0 decoding with a `feed-rs` fallback for other formats
//! - [`dates`] - Lenient publication date normalization over a fixed set of layouts
//!
//! Nothing here touches dedup state; retry policy belongs to the poll loop.
//!
//! # Example
//!
//! ```ignore
//! use rss_relay::feed::{build_http_client, fetch_once, DEFAULT_FETCH_TIMEOUT};
//!
//! let client = build_http_client(DEFAULT_FETCH_TIMEOUT)?;
//! let (channel, items) = fetch_once(&client, url, &token, DEFAULT_FETCH_TIMEOUT).await?;
//! ```

mod dates;
mod fetcher;
mod parser;
mod types;

pub use dates::{normalize_date, DateError, DateLayout, NormalizedDate};
pub use fetcher::{
    build_http_client, fetch_channel, fetch_once, FetchError, DEFAULT_FETCH_TIMEOUT,
};
pub use parser::parse_document;
pub use types::{Channel, Enclosure, FeedDocument, Item};
