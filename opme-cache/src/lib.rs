//! Cache-aside layer with per-domain TTL policy and explicit invalidation.
//!
//! Callers check the cache before expensive work (embedding generation,
//! semantic search, dashboard aggregates) and write the result back on a
//! miss. The cache is never on the correctness path: a store that is down,
//! slow or returns garbage degrades to "always miss", and write failures are
//! reported but never block the freshly computed value.
//!
//! # Key namespaces
//!
//! Every [`CacheKey`] starts with the prefix of its [`CacheDomain`]
//! (`"embedding:"`, `"search:"`, `"dashboard:"`, ...). Keys can only be
//! built through domain-aware constructors, so two domains can never collide.
//!
//! # TTL policy
//!
//! TTLs are chosen by the call site. [`TtlPolicy`] holds the per-domain
//! defaults so call sites that don't need a bespoke TTL never repeat one.
//!
//! # Example
//!
//! ```ignore
//! let cache = Cache::new(Arc::new(InMemoryKvStore::new()), &CacheSettings::from_env());
//! let key = CacheKey::scoped(CacheDomain::Dashboard, "monthlyRevenue");
//!
//! let revenue: u64 = cache
//!     .get_or_compute_with_policy(&key, || async { load_monthly_revenue().await })
//!     .await?;
//!
//! // A product update stales every search result
//! cache.invalidate_for(&InvalidationTrigger::ProductChanged { product_id: "P1".into() }).await;
//! ```

pub mod cache;
pub mod invalidation;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod policy;
pub mod read;
pub mod traits;

pub use cache::Cache;
pub use invalidation::{InvalidationTarget, InvalidationTrigger};
pub use key::{CacheDomain, CacheKey};
pub use lmdb_backend::{LmdbCacheError, LmdbKvStore};
pub use memory::InMemoryKvStore;
pub use policy::TtlPolicy;
pub use read::CacheRead;
pub use traits::{CacheStats, KvStore, StoredEntry};
