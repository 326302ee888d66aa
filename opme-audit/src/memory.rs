//! In-memory audit store.

use std::collections::HashMap;

use async_trait::async_trait;
use opme_core::StorageError;
use tokio::sync::RwLock;

use crate::block::{AuditBlock, ChainHead, ChainPartition};
use crate::store::{AuditStore, AuditStoreError};

/// Audit store holding every partition in memory.
///
/// Slot `n` of a partition's vector is chain position `n`.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    chains: RwLock<HashMap<ChainPartition, Vec<AuditBlock>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every block in a partition.
    pub async fn snapshot(&self, partition: &ChainPartition) -> Vec<AuditBlock> {
        self.chains
            .read()
            .await
            .get(partition)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a partition's blocks wholesale, e.g. from a backup.
    ///
    /// No chain rule is checked; run a verification afterwards.
    pub async fn restore(&self, partition: &ChainPartition, blocks: Vec<AuditBlock>) {
        let mut chains = self.chains.write().await;
        if blocks.is_empty() {
            chains.remove(partition);
        } else {
            chains.insert(*partition, blocks);
        }
    }

    /// Number of blocks in a partition.
    pub async fn len(&self, partition: &ChainPartition) -> usize {
        self.chains
            .read()
            .await
            .get(partition)
            .map_or(0, Vec::len)
    }

    /// Partitions holding at least one block.
    pub async fn partitions(&self) -> Vec<ChainPartition> {
        let mut partitions: Vec<_> = self.chains.read().await.keys().copied().collect();
        partitions.sort();
        partitions
    }
}

fn head_of(blocks: Option<&Vec<AuditBlock>>) -> Option<ChainHead> {
    blocks.and_then(|b| b.last()).map(AuditBlock::head)
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn head(&self, partition: &ChainPartition) -> Result<Option<ChainHead>, StorageError> {
        Ok(head_of(self.chains.read().await.get(partition)))
    }

    async fn append_if_head(
        &self,
        partition: &ChainPartition,
        expected: Option<ChainHead>,
        block: AuditBlock,
    ) -> Result<(), AuditStoreError> {
        let mut chains = self.chains.write().await;
        let actual = head_of(chains.get(partition));
        let next_index = actual.map_or(0, |h| h.next_index());
        if actual != expected || block.index != next_index {
            return Err(AuditStoreError::Conflict { expected, actual });
        }
        chains.entry(*partition).or_default().push(block);
        Ok(())
    }

    async fn range(
        &self,
        partition: &ChainPartition,
        from: u64,
        to: u64,
    ) -> Result<Vec<AuditBlock>, StorageError> {
        if from > to {
            return Ok(Vec::new());
        }
        let chains = self.chains.read().await;
        let Some(blocks) = chains.get(partition) else {
            return Ok(Vec::new());
        };
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(blocks.len());
        let end = usize::try_from(to)
            .map_or(blocks.len(), |t| t.saturating_add(1))
            .min(blocks.len());
        Ok(blocks[start..end].to_vec())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
