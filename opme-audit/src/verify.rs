//! Chain verification shared by the trail and by export bundles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::{AuditBlock, BlockHash};
use crate::canonical::compute_block_hash;

/// How a chain is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A block's stored hash differs from the hash of its content.
    HashMismatch,
    /// A block doesn't follow its predecessor: wrong index, or a
    /// `previous_hash` that isn't the predecessor's hash.
    LinkageMismatch,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::HashMismatch => f.write_str("hash mismatch"),
            ViolationKind::LinkageMismatch => f.write_str("linkage mismatch"),
        }
    }
}

/// The first break found in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainIntegrityViolation {
    /// Chain position where the break was found.
    pub index: u64,
    pub kind: ViolationKind,
    pub detail: String,
}

impl ChainIntegrityViolation {
    pub fn hash_mismatch(index: u64, detail: impl Into<String>) -> Self {
        Self {
            index,
            kind: ViolationKind::HashMismatch,
            detail: detail.into(),
        }
    }

    pub fn linkage_mismatch(index: u64, detail: impl Into<String>) -> Self {
        Self {
            index,
            kind: ViolationKind::LinkageMismatch,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ChainIntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at block {}: {}", self.kind, self.index, self.detail)
    }
}

/// Outcome of a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationResult {
    Intact {
        from: u64,
        /// Last block checked; `None` when the range was empty.
        to: Option<u64>,
        blocks_checked: u64,
        /// Recomputed hash of the last block checked, or the genesis
        /// sentinel when nothing was checked.
        tip_hash: BlockHash,
    },
    Violated(ChainIntegrityViolation),
}

impl VerificationResult {
    /// An empty range starting at `from`.
    pub fn empty(from: u64) -> Self {
        VerificationResult::Intact {
            from,
            to: None,
            blocks_checked: 0,
            tip_hash: BlockHash::GENESIS,
        }
    }

    pub fn is_intact(&self) -> bool {
        matches!(self, VerificationResult::Intact { .. })
    }

    pub fn violation(&self) -> Option<&ChainIntegrityViolation> {
        match self {
            VerificationResult::Violated(v) => Some(v),
            VerificationResult::Intact { .. } => None,
        }
    }
}

/// Number of positions in `from..=to`; `None` when `from > to` or the count
/// doesn't fit in a `u64`.
pub fn range_len(from: u64, to: u64) -> Option<u64> {
    to.checked_sub(from)?.checked_add(1)
}

/// Recompute a block's hash, reporting an unencodable block as a hash
/// mismatch at its position.
pub fn recompute(block: &AuditBlock, position: u64) -> Result<BlockHash, ChainIntegrityViolation> {
    compute_block_hash(block)
        .map_err(|e| ChainIntegrityViolation::hash_mismatch(position, e.to_string()))
}

/// Verify consecutive blocks starting at chain position `from`.
///
/// `anchor` is the recomputed hash of block `from - 1`, or the genesis
/// sentinel when `from` is 0. For each block, in order:
///
/// 1. its content must hash to its stored `hash`;
/// 2. its index must be the expected position;
/// 3. its `previous_hash` must equal the recomputed hash of the block before.
///
/// Returns the recomputed hash of the last block (or `anchor` when `blocks`
/// is empty), or the first violation.
pub fn verify_blocks(
    blocks: &[AuditBlock],
    from: u64,
    anchor: BlockHash,
) -> Result<BlockHash, ChainIntegrityViolation> {
    let mut previous = anchor;
    for (offset, block) in blocks.iter().enumerate() {
        let Some(expected_index) = u64::try_from(offset)
            .ok()
            .and_then(|offset| from.checked_add(offset))
        else {
            return Err(ChainIntegrityViolation::linkage_mismatch(
                u64::MAX,
                format!("block {} past position {} has no valid index", offset, from),
            ));
        };
        let recomputed = recompute(block, expected_index)?;
        if recomputed != block.hash {
            return Err(ChainIntegrityViolation::hash_mismatch(
                expected_index,
                format!("stored {}, content hashes to {}", block.hash, recomputed),
            ));
        }
        if block.index != expected_index {
            return Err(ChainIntegrityViolation::linkage_mismatch(
                expected_index,
                format!("expected index {}, found {}", expected_index, block.index),
            ));
        }
        if block.previous_hash != previous {
            return Err(ChainIntegrityViolation::linkage_mismatch(
                expected_index,
                format!(
                    "previous_hash {} does not match predecessor {}",
                    block.previous_hash, previous
                ),
            ));
        }
        previous = recomputed;
    }
    Ok(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ActionType, AppendRequest};
    use crate::payload::AuditPayload;
    use chrono::Utc;

    fn chain(len: u32) -> Vec<AuditBlock> {
        let mut blocks: Vec<AuditBlock> = Vec::new();
        for n in 0..len {
            let head = blocks.last().map(AuditBlock::head);
            let request = AppendRequest::new(
                ActionType::Access,
                "patient_record",
                format!("PR-{n}"),
                "user:nurse.li",
                AuditPayload::Access {
                    resource: "implant_history".to_string(),
                    purpose: None,
                },
            );
            blocks.push(AuditBlock::next(head, Utc::now(), request).unwrap());
        }
        blocks
    }

    #[test]
    fn test_intact_chain() {
        let blocks = chain(4);
        let tip = verify_blocks(&blocks, 0, BlockHash::GENESIS).unwrap();
        assert_eq!(tip, blocks[3].hash);
    }

    #[test]
    fn test_empty_slice_returns_anchor() {
        let anchor = BlockHash([7; 32]);
        assert_eq!(verify_blocks(&[], 3, anchor).unwrap(), anchor);
    }

    #[test]
    fn test_sub_range_with_anchor() {
        let blocks = chain(5);
        let anchor = compute_block_hash(&blocks[1]).unwrap();
        assert!(verify_blocks(&blocks[2..], 2, anchor).is_ok());
        assert!(verify_blocks(&blocks[2..], 2, BlockHash::GENESIS).is_err());
    }

    #[test]
    fn test_edited_field_is_hash_mismatch() {
        let mut blocks = chain(4);
        blocks[2].actor_id = "user:intruder".to_string();
        let v = verify_blocks(&blocks, 0, BlockHash::GENESIS).unwrap_err();
        assert_eq!(v.index, 2);
        assert_eq!(v.kind, ViolationKind::HashMismatch);
    }

    #[test]
    fn test_rehashed_edit_is_linkage_mismatch_downstream() {
        let mut blocks = chain(4);
        blocks[1].entity_id = "PR-forged".to_string();
        blocks[1].hash = compute_block_hash(&blocks[1]).unwrap();
        let v = verify_blocks(&blocks, 0, BlockHash::GENESIS).unwrap_err();
        assert_eq!(v.index, 2);
        assert_eq!(v.kind, ViolationKind::LinkageMismatch);
    }

    #[test]
    fn test_removed_block_is_linkage_mismatch() {
        let mut blocks = chain(4);
        blocks.remove(1);
        let v = verify_blocks(&blocks, 0, BlockHash::GENESIS).unwrap_err();
        assert_eq!(v.index, 1);
        assert_eq!(v.kind, ViolationKind::LinkageMismatch);
    }

    #[test]
    fn test_swapped_blocks_are_linkage_mismatch() {
        let mut blocks = chain(4);
        blocks.swap(1, 2);
        let v = verify_blocks(&blocks, 0, BlockHash::GENESIS).unwrap_err();
        assert_eq!(v.index, 1);
        assert_eq!(v.kind, ViolationKind::LinkageMismatch);
    }

    #[test]
    fn test_unknown_canon_version_is_hash_mismatch() {
        let mut blocks = chain(2);
        blocks[1].canon_version = 9;
        let v = verify_blocks(&blocks, 0, BlockHash::GENESIS).unwrap_err();
        assert_eq!(v.index, 1);
        assert_eq!(v.kind, ViolationKind::HashMismatch);
        assert!(v.to_string().contains("canon version 9"));
    }

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(2, 4), Some(3));
        assert_eq!(range_len(7, 7), Some(1));
        assert_eq!(range_len(5, 4), None);
        assert_eq!(range_len(0, u64::MAX), None);
        assert_eq!(range_len(1, u64::MAX), Some(u64::MAX));
    }

    #[test]
    fn test_positions_past_u64_max_are_linkage_breaks() {
        let request = || {
            AppendRequest::new(
                ActionType::Access,
                "patient_record",
                "PR-0",
                "user:nurse.li",
                AuditPayload::note("rollover"),
            )
        };
        let last = AuditBlock::seal(u64::MAX, BlockHash::GENESIS, Utc::now(), request()).unwrap();
        let beyond = AuditBlock::seal(0, last.hash, Utc::now(), request()).unwrap();

        let v = verify_blocks(&[last, beyond], u64::MAX, BlockHash::GENESIS).unwrap_err();
        assert_eq!(v.kind, ViolationKind::LinkageMismatch);
        assert_eq!(v.index, u64::MAX);
    }
}
