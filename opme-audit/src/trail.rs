//! Audit trail: append, verify and export over an [`AuditStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use opme_core::{now_micros, AuditError, AuditSettings, StorageError};

use crate::block::{AppendRequest, AuditBlock, BlockHash, ChainHead, ChainPartition};
use crate::export::ExportBundle;
use crate::store::{AuditStore, AuditStoreError};
use crate::verify::{
    range_len, recompute, verify_blocks, ChainIntegrityViolation, VerificationResult,
};

/// Log target for chain integrity violations.
pub const COMPLIANCE_TARGET: &str = "opme::compliance";

/// Handle on one partition's audit chain.
///
/// The trail keeps no chain state of its own: every append reads the head
/// from the store and writes conditionally against it, so any number of
/// trails (in any number of processes) may append to the same partition.
pub struct AuditTrail<S: AuditStore> {
    store: Arc<S>,
    partition: ChainPartition,
    settings: AuditSettings,
}

impl<S: AuditStore> Clone for AuditTrail<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            partition: self.partition,
            settings: self.settings.clone(),
        }
    }
}

impl<S: AuditStore> AuditTrail<S> {
    pub fn new(store: Arc<S>, partition: ChainPartition, settings: &AuditSettings) -> Self {
        Self {
            store,
            partition,
            settings: settings.clone(),
        }
    }

    /// A trail on another partition, sharing this trail's store and
    /// settings.
    pub fn for_partition(&self, partition: ChainPartition) -> Self {
        Self {
            store: Arc::clone(&self.store),
            partition,
            settings: self.settings.clone(),
        }
    }

    pub fn partition(&self) -> &ChainPartition {
        &self.partition
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn bounded<R, F>(&self, operation: &str, fut: F) -> Result<R, StorageError>
    where
        F: Future<Output = Result<R, StorageError>>,
    {
        tokio::time::timeout(self.settings.store_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(StorageError::Timeout {
                    operation: operation.to_string(),
                    after: self.settings.store_timeout,
                })
            })
    }

    async fn read_head(&self) -> Result<Option<ChainHead>, StorageError> {
        self.bounded("head", self.store.head(&self.partition)).await
    }

    async fn read_range(&self, from: u64, to: u64) -> Result<Vec<AuditBlock>, AuditError> {
        self.bounded("range", self.store.range(&self.partition, from, to))
            .await
            .map_err(|e| AuditError::Read {
                reason: e.to_string(),
            })
    }

    /// Current head of the chain.
    pub async fn head(&self) -> Result<Option<ChainHead>, AuditError> {
        self.read_head().await.map_err(|e| AuditError::Read {
            reason: e.to_string(),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.settings.retry_backoff.saturating_mul(attempt)
    }

    /// Record an action.
    ///
    /// Returns the persisted block. On error nothing was written, and the
    /// business action being audited must not be reported as successful.
    pub async fn append(&self, request: AppendRequest) -> Result<AuditBlock, AuditError> {
        let max_attempts = self.settings.max_append_attempts.max(1);

        for attempt in 1..=max_attempts {
            let head = self.read_head().await.map_err(|e| {
                tracing::error!(
                    partition = %self.partition,
                    attempt,
                    error = %e,
                    "Audit append failed reading chain head"
                );
                AuditError::Persistence {
                    reason: e.to_string(),
                    attempts: attempt,
                }
            })?;

            let block = AuditBlock::next(head, now_micros(), request.clone())?;
            let write = self
                .store
                .append_if_head(&self.partition, head, block.clone());

            match tokio::time::timeout(self.settings.store_timeout, write).await {
                Ok(Ok(())) => {
                    tracing::debug!(
                        partition = %self.partition,
                        index = block.index,
                        action = %block.action_type,
                        entity_type = %block.entity_type,
                        attempt,
                        "Audit block appended"
                    );
                    return Ok(block);
                }
                Ok(Err(AuditStoreError::Conflict { .. })) => {
                    tracing::debug!(
                        partition = %self.partition,
                        index = block.index,
                        attempt,
                        "Audit append conflict, retrying"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
                Ok(Err(AuditStoreError::Storage(e))) => {
                    tracing::error!(
                        partition = %self.partition,
                        attempt,
                        error = %e,
                        "Audit append failed"
                    );
                    return Err(AuditError::Persistence {
                        reason: e.to_string(),
                        attempts: attempt,
                    });
                }
                Err(_) => {
                    tracing::error!(
                        partition = %self.partition,
                        attempt,
                        timeout = ?self.settings.store_timeout,
                        "Audit append timed out"
                    );
                    return Err(AuditError::Persistence {
                        reason: format!("append timed out after {:?}", self.settings.store_timeout),
                        attempts: attempt,
                    });
                }
            }
        }

        tracing::error!(
            partition = %self.partition,
            attempts = max_attempts,
            "Audit append gave up: chain head kept moving"
        );
        Err(AuditError::Persistence {
            reason: "chain head kept moving; conflict retries exhausted".to_string(),
            attempts: max_attempts,
        })
    }

    /// Verify blocks `from..=to` (defaults: the whole chain).
    ///
    /// The extent of the chain is whatever the store holds: `to` past the
    /// last stored block is clamped, and the store's head must agree with
    /// the last block verified. An empty chain or range is intact. The chain
    /// is never modified.
    pub async fn verify_chain(
        &self,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<VerificationResult, AuditError> {
        let from = from.unwrap_or(0);
        let to = to.unwrap_or(u64::MAX);
        if from > to {
            return Ok(VerificationResult::empty(from));
        }

        let outcome = self.verify_range(from, to).await?;
        if let VerificationResult::Violated(violation) = &outcome {
            tracing::error!(
                target: COMPLIANCE_TARGET,
                partition = %self.partition,
                index = violation.index,
                kind = %violation.kind,
                detail = %violation.detail,
                "Audit chain integrity violation"
            );
        }
        Ok(outcome)
    }

    async fn verify_range(&self, from: u64, to: u64) -> Result<VerificationResult, AuditError> {
        // Head first: appends racing this verification only add blocks after it.
        let head = self.head().await?;
        let blocks = self.read_range(from, to).await?;
        let checked = blocks.len() as u64;
        let reached_end = range_len(from, to).map_or(true, |wanted| checked < wanted);

        let Some(last) = checked.checked_sub(1).map(|n| from.saturating_add(n)) else {
            return Ok(match head {
                Some(head) if head.index >= from => VerificationResult::Violated(
                    ChainIntegrityViolation::linkage_mismatch(
                        from,
                        format!(
                            "block missing: head is at {}, nothing stored from {}",
                            head.index, from
                        ),
                    ),
                ),
                _ => VerificationResult::empty(from),
            });
        };

        let anchor = match self.anchor_block(from).await? {
            None => BlockHash::GENESIS,
            Some(block) => match recompute(&block, from - 1) {
                Ok(hash) => hash,
                Err(violation) => return Ok(VerificationResult::Violated(violation)),
            },
        };

        let tip = match verify_blocks(&blocks, from, anchor) {
            Ok(tip) => tip,
            Err(violation) => return Ok(VerificationResult::Violated(violation)),
        };

        if let Some(head) = head.filter(|_| reached_end) {
            if let Some(violation) = head_disagreement(head, from, last, &blocks) {
                return Ok(VerificationResult::Violated(violation));
            }
        }

        Ok(VerificationResult::Intact {
            from,
            to: Some(last),
            blocks_checked: checked,
            tip_hash: tip,
        })
    }

    /// Block `from - 1`, when `from > 0`.
    async fn anchor_block(&self, from: u64) -> Result<Option<AuditBlock>, AuditError> {
        if from == 0 {
            return Ok(None);
        }
        let anchor = from - 1;
        let mut blocks = self.read_range(anchor, anchor).await?;
        match blocks.pop() {
            Some(block) => Ok(Some(block)),
            None => Err(AuditError::Read {
                reason: format!("anchor block {} not found in {}", anchor, self.partition),
            }),
        }
    }

    /// Export blocks `from..=to` with everything needed to verify them
    /// offline.
    pub async fn export_range(&self, from: u64, to: u64) -> Result<ExportBundle, AuditError> {
        let head = self.head().await?;
        let tip = head.map(|h| h.index);
        let wanted = match (tip, range_len(from, to)) {
            (Some(tip), Some(wanted)) if to <= tip => wanted,
            _ => return Err(AuditError::InvalidRange { from, to, tip }),
        };

        let anchor_hash = self
            .anchor_block(from)
            .await?
            .map_or(BlockHash::GENESIS, |b| b.hash);
        let blocks = self.read_range(from, to).await?;
        if blocks.len() as u64 != wanted {
            return Err(AuditError::Read {
                reason: format!(
                    "expected {} blocks in {}..={}, store returned {}",
                    wanted,
                    from,
                    to,
                    blocks.len()
                ),
            });
        }

        let bundle = ExportBundle::new(self.partition, anchor_hash, blocks, now_micros())?;
        tracing::info!(
            partition = %self.partition,
            from,
            to,
            terminal_hash = %bundle.terminal_hash,
            "Audit range exported"
        );
        Ok(bundle)
    }
}

/// Compare the head read before a range with the verified blocks
/// `from..=last` that ended the chain.
fn head_disagreement(
    head: ChainHead,
    from: u64,
    last: u64,
    blocks: &[AuditBlock],
) -> Option<ChainIntegrityViolation> {
    if head.index > last {
        return Some(ChainIntegrityViolation::linkage_mismatch(
            last + 1,
            format!("block missing: head is at {}, chain ends at {}", head.index, last),
        ));
    }
    let offset = usize::try_from(head.index.checked_sub(from)?).ok()?;
    let block = blocks.get(offset)?;
    (block.hash != head.hash).then(|| {
        ChainIntegrityViolation::linkage_mismatch(
            head.index,
            format!("store head hash {} differs from block hash {}", head.hash, block.hash),
        )
    })
}
