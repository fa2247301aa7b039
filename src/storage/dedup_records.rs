use async_trait::async_trait;
use std::time::Duration;

use super::schema::SqliteStore;
use super::types::{DedupStore, StoreError};

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl DedupStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT value
            FROM dedup_records
            WHERE key = ? AND expires_at > ?
        "#,
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let now = now_millis();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO dedup_records (key, value, stored_at, expires_at)
            VALUES (?, ?, ?, ?)
        "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now.saturating_add(ttl_millis(ttl)))
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(())
    }
}

impl SqliteStore {
    /// Delete all expired records.
    ///
    /// Returns the number of records evicted.
    pub async fn evict_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM dedup_records WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    /// Number of live (unexpired) records.
    pub async fn len(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM dedup_records WHERE expires_at > ?")
                .bind(now_millis())
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;

        Ok(count.max(0) as u64)
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}
