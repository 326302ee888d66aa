//! Audit store trait.

use async_trait::async_trait;
use opme_core::StorageError;
use thiserror::Error;

use crate::block::{AuditBlock, ChainHead, ChainPartition};

/// Failure of a conditional append.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditStoreError {
    /// The chain head moved since it was read.
    #[error("Chain head moved: expected {expected:?}, found {actual:?}")]
    Conflict {
        expected: Option<ChainHead>,
        actual: Option<ChainHead>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Persistence for audit chains.
///
/// The store does not hash or verify anything. It only guarantees that
/// [`append_if_head`](AuditStore::append_if_head) is atomic: the block is
/// written if and only if the partition's head still equals `expected`.
/// Blocks are never updated or deleted through this trait.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Current head of a partition, or `None` for an empty chain.
    async fn head(&self, partition: &ChainPartition) -> Result<Option<ChainHead>, StorageError>;

    /// Append `block` if the head of `partition` is still `expected`.
    async fn append_if_head(
        &self,
        partition: &ChainPartition,
        expected: Option<ChainHead>,
        block: AuditBlock,
    ) -> Result<(), AuditStoreError>;

    /// Blocks in chain slots `from..=to`, in order. Slots past the end are
    /// omitted.
    async fn range(
        &self,
        partition: &ChainPartition,
        from: u64,
        to: u64,
    ) -> Result<Vec<AuditBlock>, StorageError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}
