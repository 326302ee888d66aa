//! In-memory key/value store.
//!
//! Expiry deadlines are tracked on `tokio::time::Instant`, so tests can
//! drive TTL expiry with a paused runtime and `tokio::time::advance`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opme_core::StorageError;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::traits::{KvStore, StoredEntry};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    stored_at: DateTime<Utc>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory store for development, tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl InMemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the store holds no entries at all.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Write raw bytes without going through serialization.
    ///
    /// Used to seed legacy or foreign-format entries.
    pub async fn insert_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                stored_at: Utc::now(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    return Ok(Some(StoredEntry {
                        value: entry.value.clone(),
                        stored_at: entry.stored_at,
                    }));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it unless a concurrent writer already replaced it.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        self.insert_raw(key, value, ttl).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
