//! Configuration types
//!
//! Settings are read from `OPME_*` environment variables with fallback to
//! defaults, then checked with `validate()` before use.

use crate::{ConfigError, OpmeError, OpmeResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Default bound on a single cache backing-store call.
pub const DEFAULT_CACHE_OP_TIMEOUT_MS: u64 = 250;
/// Default LMDB map size for the persistent cache store.
pub const DEFAULT_CACHE_LMDB_MAP_SIZE_MB: usize = 256;
/// Default bound on a single audit store call.
pub const DEFAULT_AUDIT_STORE_TIMEOUT_MS: u64 = 2_000;
/// Default number of append attempts before giving up on conflicts.
pub const DEFAULT_AUDIT_MAX_APPEND_ATTEMPTS: u32 = 8;
/// Default base backoff between conflicting append attempts.
pub const DEFAULT_AUDIT_RETRY_BACKOFF_MS: u64 = 5;

const TTL_OVERRIDE_PREFIX: &str = "OPME_CACHE_TTL_";
const TTL_OVERRIDE_SUFFIX: &str = "_SECS";

/// Cache layer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Upper bound on any single backing-store call.
    pub op_timeout: Duration,
    /// Per-domain TTL overrides in seconds, keyed by lower-case domain name
    /// (`"dashboard"`, `"search"`, ...).
    pub ttl_overrides: BTreeMap<String, u64>,
    /// Map size for the LMDB-backed store, in megabytes.
    pub lmdb_map_size_mb: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(DEFAULT_CACHE_OP_TIMEOUT_MS),
            ttl_overrides: BTreeMap::new(),
            lmdb_map_size_mb: DEFAULT_CACHE_LMDB_MAP_SIZE_MB,
        }
    }
}

impl CacheSettings {
    /// Create CacheSettings from environment variables.
    ///
    /// # Environment Variables
    /// - `OPME_CACHE_OP_TIMEOUT_MS`: Store call timeout (default: 250)
    /// - `OPME_CACHE_LMDB_MAP_SIZE_MB`: LMDB map size (default: 256)
    /// - `OPME_CACHE_TTL_<DOMAIN>_SECS`: TTL override for one cache domain,
    ///   e.g. `OPME_CACHE_TTL_DASHBOARD_SECS=120`
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build settings from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let defaults = Self::default();

        let op_timeout = vars
            .get("OPME_CACHE_OP_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.op_timeout);

        let lmdb_map_size_mb = vars
            .get("OPME_CACHE_LMDB_MAP_SIZE_MB")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.lmdb_map_size_mb);

        let mut ttl_overrides = BTreeMap::new();
        for (name, value) in &vars {
            let Some(domain) = name
                .strip_prefix(TTL_OVERRIDE_PREFIX)
                .and_then(|rest| rest.strip_suffix(TTL_OVERRIDE_SUFFIX))
            else {
                continue;
            };
            match value.parse::<u64>() {
                Ok(secs) => {
                    ttl_overrides.insert(domain.to_lowercase(), secs);
                }
                Err(_) => {
                    tracing::warn!(
                        variable = %name,
                        value = %value,
                        "Ignoring unparseable TTL override"
                    );
                }
            }
        }

        Self {
            op_timeout,
            ttl_overrides,
            lmdb_map_size_mb,
        }
    }

    /// Set the store call timeout.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Override the TTL of one domain.
    pub fn with_ttl_override(mut self, domain: impl Into<String>, secs: u64) -> Self {
        self.ttl_overrides.insert(domain.into().to_lowercase(), secs);
        self
    }

    /// Validate the settings.
    ///
    /// Validates:
    /// - op_timeout is positive
    /// - lmdb_map_size_mb is positive
    /// - every TTL override is positive
    pub fn validate(&self) -> OpmeResult<()> {
        if self.op_timeout.is_zero() {
            return Err(invalid(
                "op_timeout",
                format!("{:?}", self.op_timeout),
                "op_timeout must be positive",
            ));
        }

        if self.lmdb_map_size_mb == 0 {
            return Err(invalid(
                "lmdb_map_size_mb",
                self.lmdb_map_size_mb.to_string(),
                "lmdb_map_size_mb must be positive",
            ));
        }

        if let Some((domain, secs)) = self.ttl_overrides.iter().find(|(_, secs)| **secs == 0) {
            return Err(invalid(
                &format!("ttl_overrides.{}", domain),
                secs.to_string(),
                "TTL overrides must be positive",
            ));
        }

        Ok(())
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Upper bound on any single audit store call.
    pub store_timeout: Duration,
    /// How many read-head/write attempts `append` makes before failing.
    pub max_append_attempts: u32,
    /// Base backoff between conflicting attempts; attempt `n` waits `n * base`.
    pub retry_backoff: Duration,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(DEFAULT_AUDIT_STORE_TIMEOUT_MS),
            max_append_attempts: DEFAULT_AUDIT_MAX_APPEND_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_AUDIT_RETRY_BACKOFF_MS),
        }
    }
}

impl AuditSettings {
    /// Create AuditSettings from environment variables.
    ///
    /// # Environment Variables
    /// - `OPME_AUDIT_STORE_TIMEOUT_MS`: Store call timeout (default: 2000)
    /// - `OPME_AUDIT_MAX_APPEND_ATTEMPTS`: Attempts under contention (default: 8)
    /// - `OPME_AUDIT_RETRY_BACKOFF_MS`: Base retry backoff (default: 5)
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build settings from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let defaults = Self::default();

        Self {
            store_timeout: vars
                .get("OPME_AUDIT_STORE_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            max_append_attempts: vars
                .get("OPME_AUDIT_MAX_APPEND_ATTEMPTS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_append_attempts),
            retry_backoff: vars
                .get("OPME_AUDIT_RETRY_BACKOFF_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
        }
    }

    /// Set the store call timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the maximum number of append attempts.
    pub fn with_max_append_attempts(mut self, attempts: u32) -> Self {
        self.max_append_attempts = attempts;
        self
    }

    /// Set the base retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Validate the settings.
    pub fn validate(&self) -> OpmeResult<()> {
        if self.store_timeout.is_zero() {
            return Err(invalid(
                "store_timeout",
                format!("{:?}", self.store_timeout),
                "store_timeout must be positive",
            ));
        }

        if self.max_append_attempts == 0 {
            return Err(invalid(
                "max_append_attempts",
                self.max_append_attempts.to_string(),
                "max_append_attempts must be at least 1",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: String, reason: &str) -> OpmeError {
    OpmeError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}
