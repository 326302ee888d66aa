//! Cache read results carrying age metadata.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A value served through the cache, with when it was stored and whether
/// it came from the store or was just computed.
///
/// Returned by [`Cache::get`](crate::Cache::get) on a hit. A miss is
/// `None`, never an error.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    /// The value.
    value: T,
    /// When this value was written to the store (or computed).
    stored_at: DateTime<Utc>,
    /// Whether the value was served from the store.
    hit: bool,
}

impl<T> CacheRead<T> {
    /// Create a read from a stored entry.
    pub fn from_cache(value: T, stored_at: DateTime<Utc>) -> Self {
        Self {
            value,
            stored_at,
            hit: true,
        }
    }

    /// Wrap a value computed on a miss.
    pub fn computed(value: T) -> Self {
        Self {
            value,
            stored_at: Utc::now(),
            hit: false,
        }
    }

    /// Check if the value was served from the store.
    pub fn was_cache_hit(&self) -> bool {
        self.hit
    }

    /// Check if the value was computed on a miss.
    pub fn was_cache_miss(&self) -> bool {
        !self.hit
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the value was stored.
    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    /// How long ago the value was stored.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Check if the data was stored at or after the given timestamp.
    pub fn is_fresh_as_of(&self, timestamp: DateTime<Utc>) -> bool {
        self.stored_at >= timestamp
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            stored_at: self.stored_at,
            hit: self.hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
