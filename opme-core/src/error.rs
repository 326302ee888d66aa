//! Error types for OPME cache and audit operations

use std::time::Duration;
use thiserror::Error;

/// Backing store errors, shared by key/value and audit stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Backing store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Storage {operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

/// Cache layer errors.
///
/// Only `InvalidTtl` and `Write` ever reach callers of `Cache::set`; the
/// remaining variants are logged and contained inside the cache boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid TTL for {key}: ttl must be a positive number of seconds")]
    InvalidTtl { key: String },

    #[error("Cache write failed for {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("Cache read failed for {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Cache serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Cache {operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Invalid cache key {key}: {reason}")]
    InvalidKey { key: String, reason: String },
}

/// Audit trail errors.
///
/// These propagate to the business action being committed: an action whose
/// audit record could not be persisted must not be reported as successful.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    #[error("Audit record could not be persisted after {attempts} attempt(s): {reason}")]
    Persistence { reason: String, attempts: u32 },

    #[error("Audit chain could not be read: {reason}")]
    Read { reason: String },

    #[error("Invalid audit range {from}..={to} (chain tip: {tip:?})")]
    InvalidRange { from: u64, to: u64, tip: Option<u64> },

    #[error("Audit block encoding failed: {reason}")]
    Encoding { reason: String },

    #[error("Invalid export bundle: {reason}")]
    Bundle { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all OPME ledger and cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpmeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for OPME operations.
pub type OpmeResult<T> = Result<T, OpmeError>;

// =============================================================================
// TESTS
// =============================================================================
