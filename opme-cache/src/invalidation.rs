//! Mutations that stale cached entries, and what each one evicts.

use serde::{Deserialize, Serialize};

use super::key::{CacheDomain, CacheKey};

/// Something evicted by an invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    /// A single key.
    Key(CacheKey),
    /// Every key starting with this prefix.
    Prefix(String),
}

impl InvalidationTarget {
    /// Every key in a domain.
    pub fn domain(domain: CacheDomain) -> Self {
        InvalidationTarget::Prefix(domain.prefix().to_string())
    }
}

/// ERP mutations that invalidate derived cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum InvalidationTrigger {
    /// A product record changed. Its projections and every search result
    /// that might include it are stale.
    ProductChanged { product_id: String },
    /// Stock moved between locations; dashboard aggregates are stale.
    InventoryMoved,
    /// The embedding model changed; vectors and vector search results are
    /// no longer comparable.
    EmbeddingModelChanged,
    /// The government device registry was re-synced.
    RegistrySynced,
    /// One dashboard scope should be recomputed.
    DashboardRefresh { scope: String },
    /// Drop a whole domain.
    Domain { domain: CacheDomain },
}

impl InvalidationTrigger {
    /// The keys and prefixes this trigger evicts.
    pub fn targets(&self) -> Vec<InvalidationTarget> {
        match self {
            InvalidationTrigger::ProductChanged { product_id } => vec![
                InvalidationTarget::Key(CacheKey::scoped(CacheDomain::Product, product_id)),
                InvalidationTarget::Prefix(format!(
                    "{}{}:",
                    CacheDomain::Product.prefix(),
                    product_id
                )),
                InvalidationTarget::domain(CacheDomain::Search),
            ],
            InvalidationTrigger::InventoryMoved => {
                vec![InvalidationTarget::domain(CacheDomain::Dashboard)]
            }
            InvalidationTrigger::EmbeddingModelChanged => vec![
                InvalidationTarget::domain(CacheDomain::Embedding),
                InvalidationTarget::domain(CacheDomain::Search),
            ],
            InvalidationTrigger::RegistrySynced => {
                vec![InvalidationTarget::domain(CacheDomain::Registry)]
            }
            InvalidationTrigger::DashboardRefresh { scope } => vec![InvalidationTarget::Key(
                CacheKey::scoped(CacheDomain::Dashboard, scope),
            )],
            InvalidationTrigger::Domain { domain } => vec![InvalidationTarget::domain(*domain)],
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            InvalidationTrigger::ProductChanged { .. } => "product_changed",
            InvalidationTrigger::InventoryMoved => "inventory_moved",
            InvalidationTrigger::EmbeddingModelChanged => "embedding_model_changed",
            InvalidationTrigger::RegistrySynced => "registry_synced",
            InvalidationTrigger::DashboardRefresh { .. } => "dashboard_refresh",
            InvalidationTrigger::Domain { .. } => "domain",
        }
    }
}
