//! Backing store trait and cache statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opme_core::StorageError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A live (unexpired) entry as returned by a [`KvStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Serialized value bytes.
    pub value: Vec<u8>,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
}

/// Backing key/value store for the cache layer.
///
/// This trait abstracts over managed caches, LMDB and in-memory maps.
/// Implementations must be safe for concurrent use.
///
/// # Contract
///
/// - `get` never returns an entry whose TTL has elapsed.
/// - `set` replaces any prior entry atomically (last write wins).
/// - `delete` and `delete_prefix` are idempotent; deleting an absent key is
///   not an error.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a live entry, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError>;

    /// Write an entry that expires `ttl` from now.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError>;

    /// Delete one key. Returns true if a live or expired entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError>;

    /// Remove entries whose TTL has elapsed. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64, StorageError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Snapshot of cache usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that returned a value.
    pub hits: u64,
    /// Reads that returned nothing, including degraded reads.
    pub misses: u64,
    /// Successful writes.
    pub writes: u64,
    /// Writes rejected by the store or timed out.
    pub write_failures: u64,
    /// Entries removed by explicit invalidation.
    pub invalidations: u64,
    /// Reads that fell back to a miss because the store failed, timed out
    /// or held an undecodable value.
    pub degraded_reads: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub write_failures: AtomicU64,
    pub invalidations: AtomicU64,
    pub degraded_reads: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            degraded_reads: self.degraded_reads.load(Ordering::Relaxed),
        }
    }
}
