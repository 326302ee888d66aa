//! Cache-aside facade over a [`KvStore`].
//!
//! The facade owns three rules the store knows nothing about:
//!
//! - every store call is bounded by the configured operation timeout;
//! - a read that fails, times out or finds an undecodable value is a miss;
//! - a compute error is returned to the caller and nothing is cached.
//!
//! No lock is held between the read, the computation and the write-back.
//! Concurrent misses on the same key may each compute; the last write wins.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use opme_core::{CacheError, CacheSettings, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::invalidation::{InvalidationTarget, InvalidationTrigger};
use super::key::{CacheDomain, CacheKey};
use super::policy::TtlPolicy;
use super::read::CacheRead;
use super::traits::{CacheCounters, CacheStats, KvStore};

/// Store operations, for error mapping and logs.
#[derive(Debug, Clone, Copy)]
enum StoreOp {
    Get,
    Set,
    Delete,
    DeletePrefix,
    Purge,
}

impl StoreOp {
    fn name(self) -> &'static str {
        match self {
            StoreOp::Get => "get",
            StoreOp::Set => "set",
            StoreOp::Delete => "delete",
            StoreOp::DeletePrefix => "delete_prefix",
            StoreOp::Purge => "purge_expired",
        }
    }

    fn failed(self, key: &str, reason: String) -> CacheError {
        let key = key.to_string();
        match self {
            StoreOp::Set => CacheError::Write { key, reason },
            _ => CacheError::Read { key, reason },
        }
    }
}

/// Cache-aside facade.
///
/// # Example
///
/// ```ignore
/// let cache = Cache::new(Arc::new(InMemoryKvStore::new()), &settings);
/// let key = CacheKey::hashed(CacheDomain::Search, &query)?;
///
/// let hits = cache
///     .get_or_compute(&key, 600, || async { search.run(&query).await })
///     .await?;
/// ```
pub struct Cache<S: KvStore> {
    /// The backing store.
    store: Arc<S>,
    /// Per-domain TTL defaults.
    policy: TtlPolicy,
    /// Upper bound on every store call.
    op_timeout: Duration,
    /// Usage counters, shared between clones.
    counters: Arc<CacheCounters>,
}

impl<S: KvStore> Clone for Cache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy.clone(),
            op_timeout: self.op_timeout,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<S: KvStore> Cache<S> {
    /// Create a cache over `store`, with the TTL policy and timeout taken
    /// from `settings`.
    pub fn new(store: Arc<S>, settings: &CacheSettings) -> Self {
        Self {
            store,
            policy: TtlPolicy::from_settings(settings),
            op_timeout: settings.op_timeout,
            counters: Arc::new(CacheCounters::default()),
        }
    }

    /// Replace the TTL policy.
    pub fn with_policy(mut self, policy: TtlPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The TTL policy in use.
    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    async fn bounded<R, F>(&self, op: StoreOp, key: &str, fut: F) -> Result<R, CacheError>
    where
        F: Future<Output = Result<R, StorageError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(op.failed(key, e.to_string())),
            Err(_) => match op {
                StoreOp::Set => Err(op.failed(
                    key,
                    format!("timed out after {:?}", self.op_timeout),
                )),
                _ => Err(CacheError::Timeout {
                    operation: op.name().to_string(),
                    after: self.op_timeout,
                }),
            },
        }
    }

    fn record_miss(&self, degraded: bool) {
        CacheCounters::bump(&self.counters.misses);
        if degraded {
            CacheCounters::bump(&self.counters.degraded_reads);
        }
    }

    /// Read a value. Returns `None` on a miss.
    ///
    /// A store that fails or times out, and a stored value that doesn't
    /// decode as `T`, are all misses. An undecodable value is also evicted.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheRead<T>> {
        let entry = match self
            .bounded(StoreOp::Get, key.as_str(), self.store.get(key.as_str()))
            .await
        {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.record_miss(false);
                tracing::trace!(key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                self.record_miss(true);
                tracing::warn!(
                    key = %key,
                    backend = self.store.backend_name(),
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                return None;
            }
        };

        match serde_json::from_slice::<T>(&entry.value) {
            Ok(value) => {
                CacheCounters::bump(&self.counters.hits);
                tracing::trace!(key = %key, "Cache hit");
                Some(CacheRead::from_cache(value, entry.stored_at))
            }
            Err(e) => {
                self.record_miss(true);
                tracing::warn!(key = %key, error = %e, "Undecodable cache entry, evicting");
                if let Err(e) = self
                    .bounded(StoreOp::Delete, key.as_str(), self.store.delete(key.as_str()))
                    .await
                {
                    tracing::debug!(key = %key, error = %e, "Eviction of undecodable entry failed");
                }
                None
            }
        }
    }

    /// Write a value that expires `ttl_secs` from now, replacing any prior
    /// entry.
    ///
    /// Callers should treat an error as non-fatal.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let result = self.write(key, value, ttl_secs).await;
        match &result {
            Ok(()) => {
                CacheCounters::bump(&self.counters.writes);
                tracing::trace!(key = %key, ttl_secs, "Cache write");
            }
            Err(e) => {
                CacheCounters::bump(&self.counters.write_failures);
                tracing::warn!(
                    key = %key,
                    backend = self.store.backend_name(),
                    error = %e,
                    "Cache write failed"
                );
            }
        }
        result
    }

    async fn write<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        if ttl_secs == 0 {
            return Err(CacheError::InvalidTtl {
                key: key.to_string(),
            });
        }
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Write {
            key: key.to_string(),
            reason: format!("serialization failed: {}", e),
        })?;
        self.bounded(
            StoreOp::Set,
            key.as_str(),
            self.store
                .set(key.as_str(), bytes, Duration::from_secs(ttl_secs)),
        )
        .await
    }

    /// Evict one key. Returns true if an entry was removed.
    ///
    /// Evicting an absent key is a no-op, and a store failure is logged and
    /// reported as nothing removed.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        match self
            .bounded(StoreOp::Delete, key.as_str(), self.store.delete(key.as_str()))
            .await
        {
            Ok(removed) => {
                if removed {
                    CacheCounters::bump(&self.counters.invalidations);
                }
                tracing::trace!(key = %key, removed, "Cache invalidate");
                removed
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache invalidation failed");
                false
            }
        }
    }

    /// Evict every key starting with `pattern`. Accepts a bare prefix
    /// (`"search:"`) or its glob form (`"search:*"`).
    ///
    /// Returns the number of entries removed. An empty pattern would match
    /// the whole store and is refused.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        if prefix.is_empty() {
            tracing::warn!(pattern, "Refusing to invalidate with an empty prefix");
            return 0;
        }
        self.invalidate_prefix(prefix).await
    }

    /// Evict every key in a domain.
    pub async fn invalidate_domain(&self, domain: CacheDomain) -> u64 {
        self.invalidate_prefix(domain.prefix()).await
    }

    async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        match self
            .bounded(StoreOp::DeletePrefix, prefix, self.store.delete_prefix(prefix))
            .await
        {
            Ok(removed) => {
                CacheCounters::add(&self.counters.invalidations, removed);
                tracing::debug!(prefix, removed, "Cache prefix invalidated");
                removed
            }
            Err(e) => {
                tracing::warn!(prefix, error = %e, "Cache prefix invalidation failed");
                0
            }
        }
    }

    /// Apply every eviction a mutation implies. Returns the total number of
    /// entries removed.
    pub async fn invalidate_for(&self, trigger: &InvalidationTrigger) -> u64 {
        let mut removed = 0;
        for target in trigger.targets() {
            removed += match target {
                InvalidationTarget::Key(key) => u64::from(self.invalidate(&key).await),
                InvalidationTarget::Prefix(prefix) => self.invalidate_prefix(&prefix).await,
            };
        }
        tracing::debug!(trigger = trigger.name(), removed, "Invalidation trigger applied");
        removed
    }

    /// Return the cached value, or run `compute` once, cache its result for
    /// `ttl_secs` and return it.
    ///
    /// A compute error is returned unchanged and nothing is cached. A failed
    /// write-back is logged and the computed value is still returned.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl_secs: u64,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_compute_read(key, ttl_secs, compute)
            .await
            .map(CacheRead::into_value)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), keeping hit/miss
    /// provenance and the stored-at time.
    pub async fn get_or_compute_read<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl_secs: u64,
        compute: F,
    ) -> Result<CacheRead<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let value = compute().await?;
        // Already logged and counted by `set`.
        let _ = self.set(key, &value, ttl_secs).await;
        Ok(CacheRead::computed(value))
    }

    /// [`get_or_compute`](Self::get_or_compute) with the TTL taken from the
    /// policy for the key's domain.
    pub async fn get_or_compute_with_policy<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ttl_secs = self.policy.ttl_secs(key.domain());
        self.get_or_compute(key, ttl_secs, compute).await
    }

    /// Drop expired entries from the store. Returns the number removed, or 0
    /// if the store failed.
    pub async fn purge_expired(&self) -> u64 {
        match self
            .bounded(StoreOp::Purge, "*", self.store.purge_expired())
            .await
        {
            Ok(removed) => {
                tracing::debug!(
                    removed,
                    backend = self.store.backend_name(),
                    "Purged expired entries"
                );
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Purging expired entries failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKvStore;
    use crate::traits::StoredEntry;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Revenue {
        month: String,
        total_cents: u64,
    }

    fn revenue() -> Revenue {
        Revenue {
            month: "2026-09".to_string(),
            total_cents: 1_250_000,
        }
    }

    fn memory_cache() -> Cache<InMemoryKvStore> {
        Cache::new(Arc::new(InMemoryKvStore::new()), &CacheSettings::default())
    }

    /// Store that rejects every call.
    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<StoredEntry>, StorageError> {
            Err(StorageError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn set(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Duration,
        ) -> Result<(), StorageError> {
            Err(StorageError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn delete(&self, _key: &str) -> Result<bool, StorageError> {
            Err(StorageError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<u64, StorageError> {
            Err(StorageError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn purge_expired(&self) -> Result<u64, StorageError> {
            Err(StorageError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        fn backend_name(&self) -> &'static str {
            "down"
        }
    }

    /// Store whose reads hang.
    struct HangingStore;

    #[async_trait]
    impl KvStore for HangingStore {
        async fn get(&self, _key: &str) -> Result<Option<StoredEntry>, StorageError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
        async fn set(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Duration,
        ) -> Result<(), StorageError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<u64, StorageError> {
            Ok(0)
        }
        async fn purge_expired(&self) -> Result<u64, StorageError> {
            Ok(0)
        }
        fn backend_name(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_until_ttl() {
        let cache = memory_cache();
        let key = CacheKey::scoped(CacheDomain::Dashboard, "monthlyRevenue");

        cache.set(&key, &revenue(), 300).await.unwrap();
        let read = cache.get::<Revenue>(&key).await.unwrap();
        assert!(read.was_cache_hit());
        assert_eq!(read.into_value(), revenue());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get::<Revenue>(&key).await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get::<Revenue>(&key).await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let cache = memory_cache();
        let key = CacheKey::scoped(CacheDomain::Search, "q");

        let err = cache.set(&key, &1u32, 0).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::InvalidTtl {
                key: "search:q".to_string()
            }
        );
        assert!(cache.get::<u32>(&key).await.is_none());
        assert_eq!(cache.stats().write_failures, 1);
    }

    #[tokio::test]
    async fn test_get_or_compute_runs_once() {
        let cache = memory_cache();
        let key = CacheKey::hashed_text(CacheDomain::Embedding, "cervical plate 3.5mm");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let vector: Vec<f32> = cache
                .get_or_compute(&key, 60, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec![0.25, -0.5, 1.0])
                })
                .await
                .unwrap();
            assert_eq!(vector, vec![0.25, -0.5, 1.0]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_compute_error_caches_nothing() {
        let cache = memory_cache();
        let key = CacheKey::scoped(CacheDomain::Registry, "80146170012");

        let result: Result<String, String> = cache
            .get_or_compute(&key, 60, || async { Err("registry unreachable".to_string()) })
            .await;
        assert_eq!(result, Err("registry unreachable".to_string()));
        assert!(cache.store().is_empty().await);

        let read = cache
            .get_or_compute_read(&key, 60, || async { Ok::<_, String>("active".to_string()) })
            .await
            .unwrap();
        assert!(read.was_cache_miss());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_compute_with_policy_uses_domain_ttl() {
        let policy = TtlPolicy::default().with_override(CacheDomain::Search, 20);
        let cache = memory_cache().with_policy(policy);
        let key = CacheKey::scoped(CacheDomain::Search, "stent");

        let _: u32 = cache
            .get_or_compute_with_policy(&key, || async { Ok::<_, String>(1) })
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(19)).await;
        assert!(cache.get::<u32>(&key).await.is_some());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get::<u32>(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let cache = memory_cache();
        let key = CacheKey::scoped(CacheDomain::Product, "P-1");

        assert!(!cache.invalidate(&key).await);
        cache.set(&key, &"catalog row", 60).await.unwrap();
        assert!(cache.invalidate(&key).await);
        assert!(!cache.invalidate(&key).await);
        assert!(cache.get::<String>(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_pattern_accepts_glob() {
        let cache = memory_cache();
        for q in ["a", "b", "c"] {
            cache
                .set(&CacheKey::scoped(CacheDomain::Search, q), &q, 60)
                .await
                .unwrap();
        }
        let kept = CacheKey::scoped(CacheDomain::Dashboard, "a");
        cache.set(&kept, &1u8, 60).await.unwrap();

        assert_eq!(cache.invalidate_pattern("search:*").await, 3);
        assert_eq!(cache.invalidate_pattern("search:").await, 0);
        assert_eq!(cache.invalidate_pattern("*").await, 0);
        assert_eq!(cache.invalidate_pattern("").await, 0);
        assert!(cache.get::<u8>(&kept).await.is_some());
        assert_eq!(cache.stats().invalidations, 3);
    }

    #[tokio::test]
    async fn test_invalidate_for_product_change() {
        let cache = memory_cache();
        let product = CacheKey::scoped(CacheDomain::Product, "P-7");
        let variant = CacheKey::scoped(CacheDomain::Product, "P-7:sizes");
        let other = CacheKey::scoped(CacheDomain::Product, "P-70");
        let search = CacheKey::scoped(CacheDomain::Search, "knee");
        for key in [&product, &variant, &other, &search] {
            cache.set(key, &"v", 60).await.unwrap();
        }

        let removed = cache
            .invalidate_for(&InvalidationTrigger::ProductChanged {
                product_id: "P-7".to_string(),
            })
            .await;
        assert_eq!(removed, 3);
        assert!(cache.get::<String>(&other).await.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss_and_evicted() {
        let cache = memory_cache();
        let key = CacheKey::scoped(CacheDomain::Dashboard, "legacy");
        cache
            .store()
            .insert_raw(key.as_str(), b"not json".to_vec(), Duration::from_secs(60))
            .await;

        assert!(cache.get::<Revenue>(&key).await.is_none());
        assert!(cache.store().is_empty().await);
        assert_eq!(cache.stats().degraded_reads, 1);
    }

    #[tokio::test]
    async fn test_store_down_degrades_to_miss() {
        let cache = Cache::new(Arc::new(DownStore), &CacheSettings::default());
        let key = CacheKey::scoped(CacheDomain::Dashboard, "stock");

        assert!(cache.get::<u32>(&key).await.is_none());
        assert!(matches!(
            cache.set(&key, &1u32, 60).await,
            Err(CacheError::Write { .. })
        ));
        assert!(!cache.invalidate(&key).await);
        assert_eq!(cache.invalidate_domain(CacheDomain::Dashboard).await, 0);
        assert_eq!(cache.purge_expired().await, 0);

        let value: u32 = cache
            .get_or_compute(&key, 60, || async { Ok::<_, String>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);

        let stats = cache.stats();
        assert_eq!(stats.degraded_reads, 2);
        assert_eq!(stats.write_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        let settings = CacheSettings::default().with_op_timeout(Duration::from_millis(250));
        let cache = Cache::new(Arc::new(HangingStore), &settings);
        let key = CacheKey::scoped(CacheDomain::Search, "slow");

        assert!(cache.get::<u32>(&key).await.is_none());
        let err = cache.set(&key, &1u32, 60).await.unwrap_err();
        assert!(
            matches!(err, CacheError::Write { ref reason, .. } if reason.contains("timed out"))
        );
    }
}
