//! LMDB-backed key/value store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped store that survives process restarts.
//!
//! # Record Format
//!
//! Each value is stored as:
//! - Bytes 0-7: `stored_at` (unix millis, little endian)
//! - Bytes 8-15: `expires_at` (unix millis, little endian)
//! - Bytes 16..: serialized value
//!
//! Expiry is enforced on read against wall-clock time; expired records are
//! removed lazily on read and in bulk by `purge_expired`.
//!
//! LMDB calls block, so every trait method runs its transaction on the
//! blocking pool. A caller's timeout then fires even while LMDB waits on its
//! writer lock.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use opme_core::StorageError;

use super::traits::{KvStore, StoredEntry};

const HEADER_LEN: usize = 16;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored record is shorter than its header.
    #[error("Corrupt record for key {0}")]
    CorruptRecord(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for StorageError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::CorruptRecord(key) => StorageError::Corrupt {
                key,
                reason: "record shorter than header".to_string(),
            },
            other => StorageError::Backend {
                backend: "lmdb".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Decoded record header.
#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    stored_at_ms: i64,
    expires_at_ms: i64,
}

impl RecordHeader {
    fn encode(&self, value: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
        bytes.extend_from_slice(&self.stored_at_ms.to_le_bytes());
        bytes.extend_from_slice(&self.expires_at_ms.to_le_bytes());
        bytes.extend_from_slice(value);
        bytes
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let stored_at_ms = i64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let expires_at_ms = i64::from_le_bytes(bytes[8..16].try_into().ok()?);
        Some(Self {
            stored_at_ms,
            expires_at_ms,
        })
    }

    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// let store = LmdbKvStore::new("/var/cache/opme", settings.lmdb_map_size_mb)?;
/// let cache = Cache::new(Arc::new(store), &settings);
/// ```
#[derive(Clone)]
pub struct LmdbKvStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbKvStore {
    /// Open (or create) an LMDB store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the map is never truncated externally while open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self { env, db })
    }

    /// Collect keys matching a predicate over (key, header).
    fn collect_keys<F>(&self, mut keep: F) -> Result<Vec<Vec<u8>>, LmdbCacheError>
    where
        F: FnMut(&[u8], Option<RecordHeader>) -> bool,
    {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, value) = result.map_err(txn_err)?;
            if keep(key, RecordHeader::decode(value)) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbCacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    fn read(&self, key: &str) -> Result<Option<StoredEntry>, LmdbCacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let expired = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let Some(bytes) = self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? else {
                return Ok(None);
            };
            let header = RecordHeader::decode(bytes)
                .ok_or_else(|| LmdbCacheError::CorruptRecord(key.to_string()))?;
            if !header.is_expired(now_ms) {
                let stored_at =
                    DateTime::from_timestamp_millis(header.stored_at_ms).unwrap_or_else(Utc::now);
                return Ok(Some(StoredEntry {
                    value: bytes[HEADER_LEN..].to_vec(),
                    stored_at,
                }));
            }
            true
        };

        if expired {
            self.delete_keys(&[key.as_bytes().to_vec()])?;
        }
        Ok(None)
    }

    fn write(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LmdbCacheError> {
        let now = Utc::now();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let header = RecordHeader {
            stored_at_ms: now.timestamp_millis(),
            expires_at_ms: now.timestamp_millis().saturating_add(ttl_ms),
        };
        let record = header.encode(value);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &record)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    /// Run `op` against a handle on this store on the blocking pool.
    async fn blocking<R, F>(&self, op: F) -> Result<R, StorageError>
    where
        R: Send + 'static,
        F: FnOnce(&LmdbKvStore) -> Result<R, LmdbCacheError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StorageError::Backend {
                backend: "lmdb".to_string(),
                reason: format!("blocking task failed: {}", e),
            })?
            .map_err(StorageError::from)
    }
}

#[async_trait]
impl KvStore for LmdbKvStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let key = key.to_string();
        self.blocking(move |store| store.read(&key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        let key = key.to_string();
        self.blocking(move |store| store.write(&key, &value, ttl)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let key = key.as_bytes().to_vec();
        self.blocking(move |store| Ok(store.delete_keys(&[key])? > 0)).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let prefix = prefix.as_bytes().to_vec();
        self.blocking(move |store| {
            let keys = store.collect_keys(|key, _| key.starts_with(&prefix))?;
            store.delete_keys(&keys)
        })
        .await
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        self.blocking(|store| {
            let now_ms = Utc::now().timestamp_millis();
            // Records without a readable header are purged too.
            let keys =
                store.collect_keys(|_, header| header.map_or(true, |h| h.is_expired(now_ms)))?;
            store.delete_keys(&keys)
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "lmdb"
    }
}
