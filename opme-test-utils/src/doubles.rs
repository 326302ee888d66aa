//! Store doubles for fault injection.
//!
//! Each double wraps a real store and changes one behaviour: fail, stall,
//! or lose a race against another writer.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::*;

fn unavailable(what: &str) -> StorageError {
    StorageError::Unavailable {
        reason: format!("{} (injected)", what),
    }
}

// ============================================================================
// KEY/VALUE STORES
// ============================================================================

/// Key/value store that fails every call while switched off.
#[derive(Debug, Default)]
pub struct FlakyKvStore {
    inner: InMemoryKvStore,
    down: AtomicBool,
    calls: AtomicU64,
}

impl FlakyKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start failing (`true`) or recover (`false`).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of calls received, failed or not.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryKvStore {
        &self.inner
    }

    fn check(&self) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(unavailable("kv store down"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FlakyKvStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        self.check()?;
        self.inner.delete_prefix(prefix).await
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        self.check()?;
        self.inner.purge_expired().await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// Key/value store that sleeps before every call.
#[derive(Debug)]
pub struct SlowKvStore {
    inner: InMemoryKvStore,
    delay: Duration,
}

impl SlowKvStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryKvStore::new(),
            delay,
        }
    }

    pub fn inner(&self) -> &InMemoryKvStore {
        &self.inner
    }
}

#[async_trait]
impl KvStore for SlowKvStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_prefix(prefix).await
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.purge_expired().await
    }

    fn backend_name(&self) -> &'static str {
        "slow"
    }
}

// ============================================================================
// AUDIT STORES
// ============================================================================

/// Audit store where another writer wins the next `n` appends.
///
/// Before each of those appends, a rival block is written on top of the head
/// the caller read, and the caller's write is rejected as a conflict.
pub struct RacingAuditStore {
    inner: Arc<InMemoryAuditStore>,
    remaining: AtomicU32,
    rival_writes: AtomicU32,
}

impl RacingAuditStore {
    pub fn new(inner: Arc<InMemoryAuditStore>, conflicts: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(conflicts),
            rival_writes: AtomicU32::new(0),
        }
    }

    /// Number of rival blocks written so far.
    pub fn rival_writes(&self) -> u32 {
        self.rival_writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryAuditStore {
        &self.inner
    }

    fn take_conflict(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AuditStore for RacingAuditStore {
    async fn head(&self, partition: &ChainPartition) -> Result<Option<ChainHead>, StorageError> {
        self.inner.head(partition).await
    }

    async fn append_if_head(
        &self,
        partition: &ChainPartition,
        expected: Option<ChainHead>,
        block: AuditBlock,
    ) -> Result<(), AuditStoreError> {
        if self.take_conflict() {
            let rival = AuditBlock::next(
                expected,
                Utc::now(),
                AppendRequest::new(
                    ActionType::Access,
                    "patient",
                    "PAT-rival",
                    "system:rival",
                    AuditPayload::note("concurrent writer"),
                ),
            )
            .map_err(|e| StorageError::Backend {
                backend: "racing".to_string(),
                reason: e.to_string(),
            })?;
            self.inner.append_if_head(partition, expected, rival).await?;
            self.rival_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.append_if_head(partition, expected, block).await
    }

    async fn range(
        &self,
        partition: &ChainPartition,
        from: u64,
        to: u64,
    ) -> Result<Vec<AuditBlock>, StorageError> {
        self.inner.range(partition, from, to).await
    }

    fn backend_name(&self) -> &'static str {
        "racing"
    }
}

/// Which audit store calls fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditFault {
    /// Every call fails.
    Unavailable,
    /// Reads work; appends fail.
    RejectAppends,
    /// Reads work; appends hang.
    StallAppends,
    /// Reads of block ranges fail; heads and appends work.
    FailRanges,
    /// Range reads silently leave out the newest block.
    HideTail,
}

/// Audit store injecting an [`AuditFault`].
pub struct FaultyAuditStore {
    inner: Arc<InMemoryAuditStore>,
    fault: AuditFault,
}

impl FaultyAuditStore {
    pub fn new(inner: Arc<InMemoryAuditStore>, fault: AuditFault) -> Self {
        Self { inner, fault }
    }

    pub fn inner(&self) -> &InMemoryAuditStore {
        &self.inner
    }
}

#[async_trait]
impl AuditStore for FaultyAuditStore {
    async fn head(&self, partition: &ChainPartition) -> Result<Option<ChainHead>, StorageError> {
        if self.fault == AuditFault::Unavailable {
            return Err(unavailable("audit store down"));
        }
        self.inner.head(partition).await
    }

    async fn append_if_head(
        &self,
        partition: &ChainPartition,
        expected: Option<ChainHead>,
        block: AuditBlock,
    ) -> Result<(), AuditStoreError> {
        match self.fault {
            AuditFault::Unavailable | AuditFault::RejectAppends => {
                Err(unavailable("audit append rejected").into())
            }
            AuditFault::StallAppends => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                self.inner.append_if_head(partition, expected, block).await
            }
            AuditFault::FailRanges | AuditFault::HideTail => {
                self.inner.append_if_head(partition, expected, block).await
            }
        }
    }

    async fn range(
        &self,
        partition: &ChainPartition,
        from: u64,
        to: u64,
    ) -> Result<Vec<AuditBlock>, StorageError> {
        match self.fault {
            AuditFault::Unavailable | AuditFault::FailRanges => {
                Err(unavailable("audit range read failed"))
            }
            AuditFault::HideTail => {
                let newest = self.inner.len(partition).await as u64;
                let mut blocks = self.inner.range(partition, from, to).await?;
                if blocks.last().is_some() && from + blocks.len() as u64 == newest {
                    blocks.pop();
                }
                Ok(blocks)
            }
            _ => self.inner.range(partition, from, to).await,
        }
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
