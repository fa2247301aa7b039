//! Polls RSS feeds, filters out items already delivered, and relays the rest.
//!
//! - [`feed`] - Fetching, parsing and date normalization
//! - [`storage`] - Durable dedup records
//! - [`reader`] - Poll loops, dedup engine and the shared output stream
//! - [`publish`] - Delivery to the downstream bus
//! - [`app`] - The relay tying reader and publisher together
//! - [`config`] - TOML configuration

pub mod app;
pub mod config;
pub mod feed;
pub mod publish;
pub mod reader;
pub mod storage;
