//! Per-domain TTL defaults.

use std::collections::BTreeMap;

use opme_core::CacheSettings;

use super::key::CacheDomain;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Default TTL for a domain, in seconds.
fn default_ttl_secs(domain: CacheDomain) -> u64 {
    match domain {
        // Embeddings only change when the model does.
        CacheDomain::Embedding => 7 * DAY,
        CacheDomain::Registry => DAY,
        CacheDomain::Completion => DAY,
        CacheDomain::Product => 15 * MINUTE,
        CacheDomain::Search => 10 * MINUTE,
        CacheDomain::Dashboard => 5 * MINUTE,
    }
}

/// Table mapping each [`CacheDomain`] to its default TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    ttls: BTreeMap<CacheDomain, u64>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            ttls: CacheDomain::ALL
                .into_iter()
                .map(|d| (d, default_ttl_secs(d)))
                .collect(),
        }
    }
}

impl TtlPolicy {
    /// Create the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the policy from settings, applying any per-domain overrides.
    ///
    /// Overrides naming an unknown domain, or a zero TTL, are logged and
    /// ignored.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        let mut policy = Self::default();
        for (name, secs) in &settings.ttl_overrides {
            match CacheDomain::from_name(name) {
                Some(domain) => policy = policy.with_override(domain, *secs),
                None => {
                    tracing::warn!(
                        domain = %name,
                        "Ignoring TTL override for unknown cache domain"
                    );
                }
            }
        }
        policy
    }

    /// Override the TTL for one domain. A zero TTL is ignored.
    pub fn with_override(mut self, domain: CacheDomain, ttl_secs: u64) -> Self {
        if ttl_secs == 0 {
            tracing::warn!(%domain, "Ignoring zero TTL override");
            return self;
        }
        self.ttls.insert(domain, ttl_secs);
        self
    }

    /// TTL in seconds for a domain.
    pub fn ttl_secs(&self, domain: CacheDomain) -> u64 {
        self.ttls
            .get(&domain)
            .copied()
            .unwrap_or_else(|| default_ttl_secs(domain))
    }

    /// Iterate over (domain, ttl_secs) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (CacheDomain, u64)> + '_ {
        self.ttls.iter().map(|(d, s)| (*d, *s))
    }
}
