//! OPME Core - Shared Types
//!
//! Identifiers, timestamps, the error taxonomy and environment-driven
//! configuration shared by the cache layer and the audit trail.
//! This crate contains no I/O.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod config;
pub mod error;

pub use config::{AuditSettings, CacheSettings};
pub use error::{AuditError, CacheError, ConfigError, OpmeError, OpmeResult, StorageError};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Tenant (distributor organisation) identifier. UUIDv7, timestamp-sortable.
pub type TenantId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 identifier.
pub fn new_entity_id() -> Uuid {
    Uuid::now_v7()
}

/// Truncate a timestamp to microsecond precision.
///
/// Audit timestamps are stored at this precision so they survive a trip
/// through RFC 3339 text unchanged.
pub fn truncate_to_micros(ts: Timestamp) -> Timestamp {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

/// Current time, truncated to microseconds.
pub fn now_micros() -> Timestamp {
    truncate_to_micros(Utc::now())
}
