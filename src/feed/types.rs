use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Feed-level metadata, fetched fresh on every `get_channel` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: String,
}

/// Media attachment of an item (`<enclosure url=".." type=".."/>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One entry of a feed.
///
/// Items are immutable once parsed. The JSON shape is the one downstream
/// consumers of the bus already read (`pubDate`, `fulltext`, `category`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Identity key as published by the feed. May be blank for malformed feeds,
    /// see [`Item::dedup_key`].
    pub guid: String,
    pub title: String,
    pub link: String,
    pub amp_link: String,
    pub description: String,
    #[serde(rename = "fulltext")]
    pub full_text: String,
    pub enclosure: Enclosure,
    #[serde(rename = "category")]
    pub categories: Vec<String>,
    pub author: String,
    pub region: String,
    /// The publication date exactly as it appeared in the document.
    #[serde(rename = "pubDate")]
    pub raw_pub_date: String,
    /// `raw_pub_date` normalized, or `None` if no known layout matched.
    #[serde(rename = "pubTimeParsed")]
    pub pub_time: Option<DateTime<FixedOffset>>,
}

impl Item {
    /// Key under which this item is deduplicated.
    ///
    /// The trimmed guid when the feed provides one. Otherwise a SHA-256 over
    /// link, title and raw date, so that distinct guid-less items never share
    /// a single blank key.
    pub fn dedup_key(&self) -> Cow<'_, str> {
        let trimmed = self.guid.trim();
        if !trimmed.is_empty() {
            return Cow::Borrowed(trimmed);
        }

        let input = format!("{}|{}|{}", self.link, self.title, self.raw_pub_date);
        let hash = Sha256::digest(input.as_bytes());
        Cow::Owned(format!("sha256:{:x}", hash))
    }
}

/// Result of decoding one feed document.
#[derive(Debug, Clone, Default)]
pub struct FeedDocument {
    pub channel: Channel,
    pub items: Vec<Item>,
}
