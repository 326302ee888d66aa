//! Export bundles for offline verification.
//!
//! A bundle is a self-describing JSON document holding a contiguous range of
//! blocks together with the hash that precedes the range (the anchor) and
//! the hash that ends it (the terminal hash). An auditor who trusts those two
//! hashes can re-verify the range without access to the store.

use opme_core::{AuditError, Timestamp};
use serde::{Deserialize, Serialize};

use crate::block::{AuditBlock, BlockHash, ChainPartition};
use crate::canonical::{CANON_VERSION, HASH_ALGORITHM};
use crate::verify::{range_len, verify_blocks, ChainIntegrityViolation, VerificationResult};

/// Current bundle document version.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Exported range of an audit chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub format_version: u32,
    pub canon_version: u16,
    /// Hash algorithm name, `"sha256"`.
    pub algorithm: String,
    pub partition: ChainPartition,
    pub from_index: u64,
    pub to_index: u64,
    /// Hash of block `from_index - 1`, or the genesis sentinel.
    pub anchor_hash: BlockHash,
    /// Hash of block `to_index`.
    pub terminal_hash: BlockHash,
    pub exported_at: Timestamp,
    pub blocks: Vec<AuditBlock>,
}

impl ExportBundle {
    /// Assemble a bundle from a non-empty, contiguous range of blocks.
    pub fn new(
        partition: ChainPartition,
        anchor_hash: BlockHash,
        blocks: Vec<AuditBlock>,
        exported_at: Timestamp,
    ) -> Result<Self, AuditError> {
        let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
            return Err(AuditError::Bundle {
                reason: "a bundle must contain at least one block".to_string(),
            });
        };
        Ok(Self {
            format_version: EXPORT_FORMAT_VERSION,
            canon_version: CANON_VERSION,
            algorithm: HASH_ALGORITHM.to_string(),
            partition,
            from_index: first.index,
            to_index: last.index,
            anchor_hash,
            terminal_hash: last.hash,
            exported_at,
            blocks,
        })
    }

    /// Pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String, AuditError> {
        serde_json::to_string_pretty(self).map_err(|e| AuditError::Bundle {
            reason: e.to_string(),
        })
    }

    /// Parse a bundle document. Unsupported format versions and hash
    /// algorithms are rejected.
    pub fn from_json(json: &str) -> Result<Self, AuditError> {
        let bundle: Self = serde_json::from_str(json).map_err(|e| AuditError::Bundle {
            reason: e.to_string(),
        })?;
        bundle.check_header()?;
        Ok(bundle)
    }

    fn check_header(&self) -> Result<(), AuditError> {
        if self.format_version != EXPORT_FORMAT_VERSION {
            return Err(AuditError::Bundle {
                reason: format!("unsupported format version {}", self.format_version),
            });
        }
        if self.algorithm != HASH_ALGORITHM {
            return Err(AuditError::Bundle {
                reason: format!("unsupported hash algorithm '{}'", self.algorithm),
            });
        }
        Ok(())
    }

    /// Re-verify the bundle using only its own contents.
    ///
    /// Checks the range against the anchor, that the bundle holds exactly
    /// `from_index..=to_index`, and that the last block hashes to the
    /// terminal hash.
    pub fn verify(&self) -> Result<VerificationResult, AuditError> {
        self.check_header()?;
        let Some(declared) = range_len(self.from_index, self.to_index) else {
            return Err(AuditError::Bundle {
                reason: format!(
                    "declared range {}..={} is not a valid block range",
                    self.from_index, self.to_index
                ),
            });
        };

        let tip = match verify_blocks(&self.blocks, self.from_index, self.anchor_hash) {
            Ok(tip) => tip,
            Err(violation) => return Ok(VerificationResult::Violated(violation)),
        };

        let checked = self.blocks.len() as u64;
        if checked != declared {
            return Ok(VerificationResult::Violated(
                ChainIntegrityViolation::linkage_mismatch(
                    self.from_index.saturating_add(checked.min(declared)),
                    format!("bundle declares {} blocks, contains {}", declared, checked),
                ),
            ));
        }
        if tip != self.terminal_hash {
            return Ok(VerificationResult::Violated(
                ChainIntegrityViolation::hash_mismatch(
                    self.to_index,
                    format!(
                        "last block hashes to {}, terminal hash is {}",
                        tip, self.terminal_hash
                    ),
                ),
            ));
        }

        Ok(VerificationResult::Intact {
            from: self.from_index,
            to: Some(self.to_index),
            blocks_checked: checked,
            tip_hash: tip,
        })
    }
}
