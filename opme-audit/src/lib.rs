//! Append-only, hash-chained audit trail.
//!
//! Every regulated business action (approvals, price changes, access to
//! patient data, exports) is recorded as an [`AuditBlock`]. Each block
//! carries the SHA-256 of its own canonical encoding and the hash of the
//! block before it, so any edit, removal or reordering of persisted blocks
//! is detectable by recomputation.
//!
//! # Concurrency
//!
//! Appends use optimistic concurrency: read the head, build the next block,
//! write it only if the head hasn't moved. A conflicting writer retries from
//! the read. Appends fail hard; an action whose audit block could not be
//! persisted must not be reported as done.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(InMemoryAuditStore::new());
//! let trail = AuditTrail::new(store, ChainPartition::Global, &settings);
//!
//! trail.append(AppendRequest::new(
//!     ActionType::Approve,
//!     "surgery_request",
//!     "SR-2026-0042",
//!     "user:dr.almeida",
//!     AuditPayload::Decision { approved: true, reason: None },
//! )).await?;
//!
//! let report = trail.verify_chain(None, None).await?;
//! let bundle = trail.export_range(0, 10).await?.to_json()?;
//! ```

pub mod block;
pub mod canonical;
pub mod export;
pub mod memory;
pub mod payload;
pub mod store;
pub mod trail;
pub mod verify;

pub use block::{ActionType, AppendRequest, AuditBlock, BlockHash, ChainHead, ChainPartition};
pub use canonical::{compute_block_hash, CANON_VERSION, HASH_ALGORITHM};
pub use export::{ExportBundle, EXPORT_FORMAT_VERSION};
pub use memory::InMemoryAuditStore;
pub use payload::{AuditPayload, FieldChange};
pub use store::{AuditStore, AuditStoreError};
pub use trail::{AuditTrail, COMPLIANCE_TARGET};
pub use verify::{
    range_len, verify_blocks, ChainIntegrityViolation, VerificationResult, ViolationKind,
};
