use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by a [`DedupStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached (pool exhausted, closed, I/O failure)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Classify a sqlx error, separating "cannot reach the store" from query errors.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => {
                let message = other.to_string().to_lowercase();
                // SQLITE_BUSY / SQLITE_LOCKED / SQLITE_CANTOPEN
                if message.contains("database is locked")
                    || message.contains("database table is locked")
                    || message.contains("unable to open database file")
                {
                    StoreError::Unavailable(other.to_string())
                } else {
                    StoreError::Database(other)
                }
            }
        }
    }
}

// ============================================================================
// Store Interface
// ============================================================================

/// Durable key/value store holding dedup records.
///
/// This is the only storage surface the reader depends on. Implementations must
/// tolerate concurrent calls for unrelated keys; the reader never needs
/// transactions across keys.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value. The record
    /// expires `ttl` after this call.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;
}
