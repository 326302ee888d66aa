//! OPME Test Utilities
//!
//! Shared test infrastructure for the OPME cache and audit crates:
//! - Proptest generators for keys, payloads and append requests
//! - Fixtures for common caches, trails and business actions
//! - Store doubles that fail, stall or race on demand
//! - Custom assertions for verification results and cache reads
//! - Tracing bootstrap for tests

pub use opme_audit::{
    ActionType, AppendRequest, AuditBlock, AuditPayload, AuditStore, AuditStoreError, AuditTrail,
    BlockHash, ChainHead, ChainIntegrityViolation, ChainPartition, ExportBundle, FieldChange,
    InMemoryAuditStore, VerificationResult, ViolationKind,
};
pub use opme_cache::{
    Cache, CacheDomain, CacheKey, CacheRead, CacheStats, InMemoryKvStore, InvalidationTrigger,
    KvStore, StoredEntry, TtlPolicy,
};
pub use opme_core::{
    AuditError, AuditSettings, CacheError, CacheSettings, StorageError, TenantId, Timestamp,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

pub mod doubles;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber once per process.
///
/// The filter comes from `RUST_LOG` (default: warnings, plus debug for the
/// OPME crates). Set `OPME_TEST_LOG_FORMAT=json` for JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,opme_cache=debug,opme_audit=debug"));
    let json = std::env::var("OPME_TEST_LOG_FORMAT").is_ok_and(|v| v == "json");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_test_writer())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init()
    };
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache and audit types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a microsecond-precision timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800i64..1_893_456_000i64, 0u32..1_000_000).prop_map(|(secs, micros)| {
            chrono::DateTime::from_timestamp(secs, micros * 1_000).unwrap_or_else(Utc::now)
        })
    }

    // === Cache ===

    pub fn arb_cache_domain() -> impl Strategy<Value = CacheDomain> {
        prop::sample::select(CacheDomain::ALL.to_vec())
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        (arb_cache_domain(), "[a-zA-Z0-9_.-]{1,24}")
            .prop_map(|(domain, scope)| CacheKey::scoped(domain, scope))
    }

    /// TTL between one second and a week.
    pub fn arb_ttl_secs() -> impl Strategy<Value = u64> {
        1u64..=604_800
    }

    // === Audit ===

    pub fn arb_action_type() -> impl Strategy<Value = ActionType> {
        prop::sample::select(ActionType::ALL.to_vec())
    }

    pub fn arb_partition() -> impl Strategy<Value = ChainPartition> {
        prop_oneof![
            Just(ChainPartition::Global),
            arb_uuid().prop_map(ChainPartition::Tenant),
        ]
    }

    pub fn arb_block_hash() -> impl Strategy<Value = BlockHash> {
        any::<[u8; 32]>().prop_map(BlockHash)
    }

    /// Generate a JSON value without floats, nested at most three levels.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 _\\-\"\\\\\n]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn arb_short_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 .,:_-]{0,32}"
    }

    pub fn arb_payload() -> impl Strategy<Value = AuditPayload> {
        prop_oneof![
            arb_json_value().prop_map(|snapshot| AuditPayload::Created { snapshot }),
            prop::collection::vec(
                ("[a-z_]{1,12}", arb_json_value(), arb_json_value())
                    .prop_map(|(field, before, after)| FieldChange::new(field, before, after)),
                0..4
            )
            .prop_map(|changes| AuditPayload::Updated { changes }),
            proptest::option::of(arb_short_text())
                .prop_map(|reason| AuditPayload::Deleted { reason }),
            (any::<bool>(), proptest::option::of(arb_short_text()))
                .prop_map(|(approved, reason)| AuditPayload::Decision { approved, reason }),
            (arb_short_text(), proptest::option::of(arb_short_text()))
                .prop_map(|(resource, purpose)| AuditPayload::Access { resource, purpose }),
            ("(csv|pdf|json)", any::<u64>())
                .prop_map(|(format, record_count)| AuditPayload::Export { format, record_count }),
            (
                arb_short_text(),
                any::<bool>(),
                prop::collection::vec(arb_short_text(), 0..3)
            )
                .prop_map(|(rule, passed, findings)| AuditPayload::ComplianceCheck {
                    rule,
                    passed,
                    findings
                }),
            arb_short_text().prop_map(|text| AuditPayload::Note { text }),
            ("[a-z]{1,8}/[a-z0-9.+-]{1,12}", prop::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(content_type, bytes)| AuditPayload::Opaque {
                    content_type,
                    bytes
                }),
        ]
    }

    pub fn arb_append_request() -> impl Strategy<Value = AppendRequest> {
        (
            arb_action_type(),
            "[a-z_]{1,16}",
            "[A-Z]{2,3}-[0-9]{1,6}",
            "(user|system):[a-z.]{1,12}",
            arb_payload(),
        )
            .prop_map(|(action, entity_type, entity_id, actor_id, payload)| {
                AppendRequest::new(action, entity_type, entity_id, actor_id, payload)
            })
    }

    pub fn arb_block_field() -> impl Strategy<Value = fixtures::BlockField> {
        prop::sample::select(fixtures::BlockField::ALL.to_vec())
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built caches, trails and business actions.

    use super::*;
    use serde_json::json;

    /// Cache settings with a short store timeout.
    pub fn cache_settings() -> CacheSettings {
        CacheSettings::default().with_op_timeout(Duration::from_millis(50))
    }

    /// Audit settings with a short timeout and a 1ms backoff.
    pub fn audit_settings() -> AuditSettings {
        AuditSettings::default()
            .with_store_timeout(Duration::from_millis(200))
            .with_retry_backoff(Duration::from_millis(1))
    }

    pub fn memory_cache() -> Cache<InMemoryKvStore> {
        Cache::new(Arc::new(InMemoryKvStore::new()), &cache_settings())
    }

    pub fn memory_trail() -> AuditTrail<InMemoryAuditStore> {
        AuditTrail::new(
            Arc::new(InMemoryAuditStore::new()),
            ChainPartition::Global,
            &audit_settings(),
        )
    }

    /// A partition for a freshly generated tenant.
    pub fn tenant_partition() -> ChainPartition {
        ChainPartition::tenant(Uuid::now_v7())
    }

    /// Approval of a surgery request.
    pub fn surgery_approval(n: u32) -> AppendRequest {
        AppendRequest::new(
            ActionType::Approve,
            "surgery_request",
            format!("SR-2026-{n:04}"),
            "user:dr.almeida",
            AuditPayload::Decision {
                approved: true,
                reason: Some("covered by health plan".to_string()),
            },
        )
    }

    /// Price change on a product.
    pub fn price_update(product_id: &str, before_cents: u64, after_cents: u64) -> AppendRequest {
        AppendRequest::new(
            ActionType::Update,
            "product",
            product_id,
            "user:pricing",
            AuditPayload::Updated {
                changes: vec![FieldChange::new(
                    "unit_price_cents",
                    json!(before_cents),
                    json!(after_cents),
                )],
            },
        )
    }

    /// Read access to a patient's implant history.
    pub fn patient_access(patient_id: &str) -> AppendRequest {
        AppendRequest::new(
            ActionType::Access,
            "patient",
            patient_id,
            "user:nurse.li",
            AuditPayload::Access {
                resource: "implant_history".to_string(),
                purpose: Some("traceability audit".to_string()),
            },
        )
    }

    /// Block fields that feed the hash.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum BlockField {
        Index,
        Timestamp,
        ActionType,
        EntityType,
        EntityId,
        ActorId,
        Payload,
        PreviousHash,
    }

    impl BlockField {
        pub const ALL: [BlockField; 8] = [
            BlockField::Index,
            BlockField::Timestamp,
            BlockField::ActionType,
            BlockField::EntityType,
            BlockField::EntityId,
            BlockField::ActorId,
            BlockField::Payload,
            BlockField::PreviousHash,
        ];
    }

    /// Change one field of a block in place, leaving its stored hash alone.
    pub fn tamper(block: &mut AuditBlock, field: BlockField) {
        match field {
            BlockField::Index => block.index = block.index.checked_sub(1).unwrap_or(1),
            BlockField::Timestamp => block.timestamp += chrono::Duration::microseconds(1),
            BlockField::ActionType => {
                let position = ActionType::ALL
                    .iter()
                    .position(|a| *a == block.action_type)
                    .unwrap_or(0);
                block.action_type = ActionType::ALL[(position + 1) % ActionType::ALL.len()];
            }
            BlockField::EntityType => block.entity_type.push('~'),
            BlockField::EntityId => block.entity_id.push('~'),
            BlockField::ActorId => block.actor_id.push('~'),
            BlockField::Payload => {
                block.payload = match &block.payload {
                    AuditPayload::Note { text } => AuditPayload::note(format!("{text}~")),
                    _ => AuditPayload::note("tampered"),
                }
            }
            BlockField::PreviousHash => block.previous_hash.0[0] ^= 0xff,
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for verification results, cache reads and audit errors.

    use super::*;

    /// Assert that a verification found no violation.
    #[track_caller]
    pub fn assert_intact(result: &VerificationResult) {
        assert!(result.is_intact(), "Expected intact chain, got: {:?}", result);
    }

    /// Assert that a verification stopped at `index` with `kind`.
    #[track_caller]
    pub fn assert_violation_at(result: &VerificationResult, index: u64, kind: ViolationKind) {
        match result.violation() {
            Some(v) => {
                assert_eq!(v.index, index, "Violation at wrong block: {}", v);
                assert_eq!(v.kind, kind, "Wrong violation kind: {}", v);
            }
            None => panic!("Expected {:?} at block {}, chain was intact", kind, index),
        }
    }

    /// Assert that an append failed with a persistence error.
    #[track_caller]
    pub fn assert_persistence_error<T: std::fmt::Debug>(result: &Result<T, AuditError>) {
        match result {
            Err(AuditError::Persistence { .. }) => {}
            other => panic!("Expected Persistence error, got: {:?}", other),
        }
    }

    /// Assert that a cache read was a hit with `expected`.
    #[track_caller]
    pub fn assert_cache_hit<T: std::fmt::Debug + PartialEq>(
        read: &Option<CacheRead<T>>,
        expected: &T,
    ) {
        match read {
            Some(read) => {
                assert!(read.was_cache_hit(), "Value was computed, not cached");
                assert_eq!(read.value(), expected);
            }
            None => panic!("Expected cache hit with {:?}, got a miss", expected),
        }
    }

    /// Assert that a cache read was a miss.
    #[track_caller]
    pub fn assert_cache_miss<T: std::fmt::Debug>(read: &Option<CacheRead<T>>) {
        assert!(read.is_none(), "Expected cache miss, got: {:?}", read);
    }

    /// Assert that blocks form a gap-free chain from genesis.
    #[track_caller]
    pub fn assert_chain_linked(blocks: &[AuditBlock]) {
        let mut previous = BlockHash::GENESIS;
        for (expected, block) in (0u64..).zip(blocks) {
            assert_eq!(block.index, expected, "Index gap at position {}", expected);
            assert_eq!(
                block.previous_hash, previous,
                "Block {} does not link to its predecessor",
                expected
            );
            previous = block.hash;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixture_settings_are_valid() {
        assert!(fixtures::cache_settings().validate().is_ok());
        assert!(fixtures::audit_settings().validate().is_ok());
    }

    #[test]
    fn test_tamper_changes_every_field() {
        let block = AuditBlock::next(None, Utc::now(), fixtures::surgery_approval(1)).unwrap();
        for field in fixtures::BlockField::ALL {
            let mut tampered = block.clone();
            fixtures::tamper(&mut tampered, field);
            assert_ne!(tampered, block, "{:?} was not changed", field);
        }
    }

    #[tokio::test]
    async fn test_memory_trail_fixture() {
        let trail = fixtures::memory_trail();
        trail.append(fixtures::patient_access("PAT-1")).await.unwrap();
        trail.append(fixtures::price_update("P-1", 100, 90)).await.unwrap();
        assertions::assert_chain_linked(&trail.store().snapshot(&ChainPartition::Global).await);
        assertions::assert_intact(&trail.verify_chain(None, None).await.unwrap());
    }

    #[test]
    #[should_panic(expected = "Expected cache miss")]
    fn test_assert_cache_miss_panics_on_hit() {
        let read = Some(CacheRead::from_cache(1u8, Utc::now()));
        assertions::assert_cache_miss(&read);
    }

    proptest! {
        #[test]
        fn prop_generated_payloads_survive_json(payload in generators::arb_payload()) {
            let json = serde_json::to_string(&payload).unwrap();
            let back: AuditPayload = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, payload);
        }

        #[test]
        fn prop_generated_keys_parse_back(key in generators::arb_cache_key()) {
            let parsed = CacheKey::parse(key.as_str()).unwrap();
            prop_assert_eq!(parsed, key);
        }
    }
}
