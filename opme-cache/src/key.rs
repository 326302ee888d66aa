//! Domain-namespaced cache keys.
//!
//! `CacheKey` has private fields: the only way to build one is through a
//! constructor that takes a [`CacheDomain`], so every key carries its
//! domain prefix by construction.

use opme_core::CacheError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Separator between the domain name and the rest of the key.
const SEPARATOR: char = ':';

/// Cache namespaces used across the ERP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDomain {
    /// Text embedding vectors, keyed by content hash.
    Embedding,
    /// Semantic / full-text search results, keyed by query hash.
    Search,
    /// Dashboard aggregates, keyed by scope name.
    Dashboard,
    /// Government device-registry lookups.
    Registry,
    /// LLM completions, keyed by prompt hash.
    Completion,
    /// Product catalogue projections.
    Product,
}

impl CacheDomain {
    /// All domains, in declaration order.
    pub const ALL: [CacheDomain; 6] = [
        CacheDomain::Embedding,
        CacheDomain::Search,
        CacheDomain::Dashboard,
        CacheDomain::Registry,
        CacheDomain::Completion,
        CacheDomain::Product,
    ];

    /// Lower-case domain name.
    pub fn name(&self) -> &'static str {
        match self {
            CacheDomain::Embedding => "embedding",
            CacheDomain::Search => "search",
            CacheDomain::Dashboard => "dashboard",
            CacheDomain::Registry => "registry",
            CacheDomain::Completion => "completion",
            CacheDomain::Product => "product",
        }
    }

    /// Key prefix for this domain, including the separator.
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheDomain::Embedding => "embedding:",
            CacheDomain::Search => "search:",
            CacheDomain::Dashboard => "dashboard:",
            CacheDomain::Registry => "registry:",
            CacheDomain::Completion => "completion:",
            CacheDomain::Product => "product:",
        }
    }

    /// Look a domain up by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|d| d.name() == name)
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cache key scoped to a [`CacheDomain`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    domain: CacheDomain,
    raw: String,
}

impl CacheKey {
    /// Build a readable key, e.g. `dashboard:monthlyRevenue`.
    pub fn scoped(domain: CacheDomain, scope: impl AsRef<str>) -> Self {
        Self {
            domain,
            raw: format!("{}{}", domain.prefix(), scope.as_ref()),
        }
    }

    /// Build a key from the SHA-256 of a piece of text, e.g. the input of an
    /// embedding request.
    pub fn hashed_text(domain: CacheDomain, text: &str) -> Self {
        Self::scoped(domain, sha256_hex(text.as_bytes()))
    }

    /// Build a key from the SHA-256 of the canonical JSON form of `input`.
    ///
    /// Object keys are emitted in sorted order, so two structurally equal
    /// queries always hash to the same key regardless of field order.
    pub fn hashed<T: Serialize + ?Sized>(
        domain: CacheDomain,
        input: &T,
    ) -> Result<Self, CacheError> {
        let value = serde_json::to_value(input).map_err(|e| CacheError::Serialization {
            key: domain.prefix().to_string(),
            reason: e.to_string(),
        })?;
        let bytes = serde_json::to_vec(&value).map_err(|e| CacheError::Serialization {
            key: domain.prefix().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::scoped(domain, sha256_hex(&bytes)))
    }

    /// Parse a raw key string. The key must start with a known domain prefix.
    pub fn parse(raw: &str) -> Result<Self, CacheError> {
        let (name, _) = raw.split_once(SEPARATOR).ok_or_else(|| CacheError::InvalidKey {
            key: raw.to_string(),
            reason: "missing domain separator".to_string(),
        })?;
        let domain = CacheDomain::from_name(name)
            .filter(|d| raw.starts_with(d.prefix()))
            .ok_or_else(|| CacheError::InvalidKey {
                key: raw.to_string(),
                reason: format!("unknown cache domain '{}'", name),
            })?;
        Ok(Self {
            domain,
            raw: raw.to_string(),
        })
    }

    /// The domain this key belongs to.
    pub fn domain(&self) -> CacheDomain {
        self.domain
    }

    /// The full key string, prefix included.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The part of the key after the domain prefix.
    pub fn scope(&self) -> &str {
        &self.raw[self.domain.prefix().len()..]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scoped_key_carries_prefix() {
        let key = CacheKey::scoped(CacheDomain::Dashboard, "monthlyRevenue");
        assert_eq!(key.as_str(), "dashboard:monthlyRevenue");
        assert_eq!(key.domain(), CacheDomain::Dashboard);
        assert_eq!(key.scope(), "monthlyRevenue");
    }

    #[test]
    fn test_hashed_text_is_stable() {
        let a = CacheKey::hashed_text(CacheDomain::Embedding, "knee prosthesis");
        let b = CacheKey::hashed_text(CacheDomain::Embedding, "knee prosthesis");
        let c = CacheKey::hashed_text(CacheDomain::Embedding, "hip prosthesis");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("embedding:"));
        assert_eq!(a.scope().len(), 64);
    }

    #[test]
    fn test_hashed_ignores_field_order() {
        let a = CacheKey::hashed(CacheDomain::Search, &json!({"q": "stent", "limit": 10})).unwrap();
        let b = CacheKey::hashed(CacheDomain::Search, &json!({"limit": 10, "q": "stent"})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_scope_different_domains_do_not_collide() {
        let a = CacheKey::scoped(CacheDomain::Search, "x");
        let b = CacheKey::scoped(CacheDomain::Product, "x");
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_known_domain() {
        let key = CacheKey::parse("registry:80146170012").unwrap();
        assert_eq!(key.domain(), CacheDomain::Registry);
        assert_eq!(key.scope(), "80146170012");
    }

    #[test]
    fn test_parse_rejects_unknown_domain() {
        assert!(matches!(
            CacheKey::parse("session:abc"),
            Err(CacheError::InvalidKey { .. })
        ));
        assert!(matches!(
            CacheKey::parse("no-separator"),
            Err(CacheError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_domain_from_name() {
        for domain in CacheDomain::ALL {
            assert_eq!(CacheDomain::from_name(domain.name()), Some(domain));
        }
        assert_eq!(CacheDomain::from_name("DASHBOARD"), Some(CacheDomain::Dashboard));
        assert_eq!(CacheDomain::from_name("session"), None);
    }
}
