//! Durable dedup state.
//!
//! The reader only needs two operations from storage: read a key and write a
//! key with an expiry. [`DedupStore`] captures exactly that; [`SqliteStore`]
//! is the durable implementation and [`MemoryStore`] the in-process one.

mod dedup_records;
mod memory;
mod schema;
mod types;

pub use memory::MemoryStore;
pub use schema::SqliteStore;
pub use types::{DedupStore, StoreError};
