use serde::Serialize;

use crate::feed::{Channel, Item};

/// Message body sent to the bus for every relayed item.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<'a> {
    pub news_item: &'a Item,
    pub channel: ChannelInfo<'a>,
    pub is_testing: bool,
}

/// Channel metadata as carried in an [`Envelope`], tagged with the feed code.
#[derive(Debug, Serialize)]
pub struct ChannelInfo<'a> {
    pub title: &'a str,
    pub link: &'a str,
    pub description: &'a str,
    pub language: &'a str,
    pub code: &'a str,
}

impl<'a> Envelope<'a> {
    pub fn new(item: &'a Item, channel: &'a Channel, is_testing: bool, feed_code: &'a str) -> Self {
        Self {
            news_item: item,
            channel: ChannelInfo {
                title: &channel.title,
                link: &channel.link,
                description: &channel.description,
                language: &channel.language,
                code: feed_code,
            },
            is_testing,
        }
    }
}
