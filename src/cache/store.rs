use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

use super::{CacheKey, CachedResponse, Freshness};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value blob store with per-entry expiry.
///
/// The edge only reads and writes; entries disappear on their own once
/// `stored_until` passes. Consistency is "eventually read your last write".
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, StoreError>;

    /// Inserts or overwrites the entry under its own key.
    async fn put(&self, entry: CachedResponse) -> Result<(), StoreError>;

    /// Number of entries currently held, if the store can tell cheaply.
    fn approximate_len(&self) -> Option<usize> {
        None
    }
}

/// In-process [`CacheStore`] on a sharded concurrent map.
///
/// Expired entries are evicted lazily on read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<CacheKey, CachedResponse>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, StoreError> {
        let now = Instant::now();
        let found = self.entries.get(key).map(|entry| entry.value().clone());
        match found {
            Some(entry) if entry.freshness(now) == Freshness::Expired => {
                self.entries
                    .remove_if(key, |_, current| current.freshness(now) == Freshness::Expired);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn put(&self, entry: CachedResponse) -> Result<(), StoreError> {
        self.entries.insert(entry.key().clone(), entry);
        Ok(())
    }

    fn approximate_len(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}
