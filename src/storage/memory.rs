use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::types::{DedupStore, StoreError};

/// Longer TTLs are clamped so the expiry instant cannot overflow.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// In-process [`DedupStore`]. State is lost on exit; used for `--ephemeral`
/// runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|(_, (_, expires_at))| *expires_at > now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remaining lifetime of `key`, if it is live.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .get(key)
            .and_then(|(_, expires_at)| expires_at.checked_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Drop expired records. Returns the number removed.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now() + ttl.min(MAX_TTL);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_vec(), expires_at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_records_expire() {
        let store = MemoryStore::new();
        store.set("short", b"1", Duration::from_secs(60)).await.unwrap();
        store.set("long", b"2", Duration::from_secs(600)).await.unwrap();
        assert_eq!(store.len().await, 2);

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert_eq!(store.get("long").await.unwrap().as_deref(), Some(&b"2"[..]));
        assert_eq!(store.keys().await, vec!["long".to_string()]);
        assert_eq!(store.evict_expired().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_reports_remaining() {
        let store = MemoryStore::new();
        store.set("k", b"v", Duration::from_secs(100)).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(store.ttl("k").await, Some(Duration::from_secs(60)));
        assert_eq!(store.ttl("missing").await, None);
    }
}
