use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use super::dates::normalize_date;
use super::types::{Channel, Enclosure, FeedDocument, Item};

/// Decodes a feed document into channel metadata and items.
///
/// RSS 2.0 documents are decoded structurally so that every item field and the
/// raw `pubDate` string survive untouched. Everything else (Atom, RSS 1.0,
/// JSON Feed, non-UTF-8 RSS) goes through `feed-rs`.
///
/// Each item's date is normalized; an unparsable date leaves `pub_time` empty
/// instead of failing the document.
///
/// # Errors
///
/// Returns a description of the problem if the body is not a well-formed feed.
pub fn parse_document(bytes: &[u8]) -> Result<FeedDocument, String> {
    let mut document = match std::str::from_utf8(bytes) {
        Ok(text) if root_element(text)?.as_deref() == Some("rss") => decode_rss(text)?,
        _ => decode_generic(bytes)?,
    };

    for item in &mut document.items {
        if item.raw_pub_date.trim().is_empty() {
            continue;
        }
        match normalize_date(&item.raw_pub_date) {
            Ok(date) => item.pub_time = Some(date.time()),
            Err(e) => {
                tracing::debug!(guid = %item.guid, error = %e, "Leaving item date unparsed");
            }
        }
    }

    Ok(document)
}

/// Local name of the document's root element, or `None` for non-XML bodies.
fn root_element(text: &str) -> Result<Option<String>, String> {
    if text.trim_start().starts_with('{') {
        return Ok(None);
    }

    // SEC-002: quick-xml never expands custom entities, so a hostile DOCTYPE is inert here.
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(Some(
                    String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                ));
            }
            Ok(Event::Eof) => return Err("document has no root element".to_string()),
            Ok(_) => continue,
            Err(e) => return Err(format!("XML error: {e}")),
        }
    }
}

// ============================================================================
// RSS 2.0
// ============================================================================

#[derive(Debug, Deserialize)]
struct RssDocument {
    #[serde(default)]
    channel: RssChannel,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssChannel {
    title: String,
    link: String,
    description: String,
    language: String,
    #[serde(rename = "item")]
    items: Vec<RssItem>,
}

/// Element text that may carry attributes (`<guid isPermaLink="false">`).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Text {
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssEnclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssItem {
    guid: Text,
    title: String,
    link: String,
    #[serde(rename = "amplink")]
    amp_link: String,
    description: String,
    #[serde(rename = "content:encoded", alias = "encoded")]
    full_text: String,
    #[serde(rename = "enclosure")]
    enclosures: Vec<RssEnclosure>,
    #[serde(rename = "category")]
    categories: Vec<Text>,
    author: String,
    region: String,
    #[serde(rename = "pubDate")]
    pub_date: String,
}

fn decode_rss(text: &str) -> Result<FeedDocument, String> {
    let rss: RssDocument =
        quick_xml::de::from_str(text).map_err(|e| format!("RSS decode error: {e}"))?;
    let channel = rss.channel;

    let items = channel
        .items
        .into_iter()
        .map(|it| {
            let enclosure = it
                .enclosures
                .into_iter()
                .next()
                .map(|e| Enclosure {
                    url: e.url,
                    kind: e.kind,
                })
                .unwrap_or_default();
            Item {
                guid: it.guid.value,
                title: it.title,
                link: it.link,
                amp_link: it.amp_link,
                description: it.description,
                full_text: it.full_text,
                enclosure,
                categories: it.categories.into_iter().map(|c| c.value).collect(),
                author: it.author,
                region: it.region,
                raw_pub_date: it.pub_date,
                pub_time: None,
            }
        })
        .collect();

    Ok(FeedDocument {
        channel: Channel {
            title: channel.title,
            link: channel.link,
            description: channel.description,
            language: channel.language,
        },
        items,
    })
}

// ============================================================================
// Atom, RSS 1.0, JSON Feed
// ============================================================================

fn decode_generic(bytes: &[u8]) -> Result<FeedDocument, String> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| format!("feed decode error: {e}"))?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let enclosure = entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .find_map(|c| {
                    c.url.as_ref().map(|url| Enclosure {
                        url: url.to_string(),
                        kind: c
                            .content_type
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_default(),
                    })
                })
                .unwrap_or_default();

            Item {
                guid: entry.id,
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link: entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .unwrap_or_default(),
                amp_link: String::new(),
                description: entry.summary.map(|s| s.content).unwrap_or_default(),
                full_text: entry.content.and_then(|c| c.body).unwrap_or_default(),
                enclosure,
                categories: entry
                    .categories
                    .into_iter()
                    .map(|c| c.label.unwrap_or(c.term))
                    .collect(),
                author: entry
                    .authors
                    .into_iter()
                    .next()
                    .map(|p| p.name)
                    .unwrap_or_default(),
                region: String::new(),
                raw_pub_date: entry
                    .published
                    .or(entry.updated)
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_default(),
                pub_time: None,
            }
        })
        .collect();

    Ok(FeedDocument {
        channel: Channel {
            title: feed.title.map(|t| t.content).unwrap_or_default(),
            link: feed
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            description: feed.description.map(|d| d.content).unwrap_or_default(),
            language: feed.language.unwrap_or_default(),
        },
        items,
    })
}
