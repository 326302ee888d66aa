//! Audit block model.

use std::fmt;

use chrono::SecondsFormat;
use opme_core::{truncate_to_micros, AuditError, TenantId, Timestamp};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::canonical::{compute_block_hash, CANON_VERSION};
use crate::payload::AuditPayload;

// ============================================================================
// ACTION TYPE
// ============================================================================

/// Kind of regulated business action being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    Approve,
    Reject,
    Access,
    Export,
    ComplianceCheck,
}

impl ActionType {
    /// All action types.
    pub const ALL: [ActionType; 8] = [
        ActionType::Create,
        ActionType::Update,
        ActionType::Delete,
        ActionType::Approve,
        ActionType::Reject,
        ActionType::Access,
        ActionType::Export,
        ActionType::ComplianceCheck,
    ];

    /// Snake-case name, as used in the canonical encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::Approve => "approve",
            ActionType::Reject => "reject",
            ActionType::Access => "access",
            ActionType::Export => "export",
            ActionType::ComplianceCheck => "compliance_check",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// BLOCK HASH
// ============================================================================

/// SHA-256 digest of a block's canonical encoding.
///
/// Serialized as lower-case hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// Sentinel used as `previous_hash` of the genesis block.
    pub const GENESIS: BlockHash = BlockHash([0u8; 32]);

    /// Lower-case hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, AuditError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| AuditError::Encoding {
            reason: format!("invalid block hash '{}': {}", s, e),
        })?;
        Ok(Self(bytes))
    }

    /// Check if this is the genesis sentinel.
    pub fn is_genesis(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// PARTITIONS AND HEADS
// ============================================================================

/// An independently chained audit sequence.
///
/// Each partition starts from its own genesis block; no block ever
/// references another partition's hashes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChainPartition {
    /// Platform-wide chain.
    #[default]
    Global,
    /// One chain per tenant organisation.
    Tenant(TenantId),
}

impl ChainPartition {
    pub fn tenant(id: TenantId) -> Self {
        ChainPartition::Tenant(id)
    }
}

impl fmt::Display for ChainPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainPartition::Global => f.write_str("global"),
            ChainPartition::Tenant(id) => write!(f, "tenant:{}", id),
        }
    }
}

/// Latest block of a chain: the state an append is conditioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub index: u64,
    pub hash: BlockHash,
}

impl ChainHead {
    /// Index the next block must take.
    pub fn next_index(&self) -> u64 {
        self.index + 1
    }
}

// ============================================================================
// APPEND REQUEST
// ============================================================================

/// What a caller asks to record. The trail fills in index, timestamp and
/// hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub action_type: ActionType,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: String,
    pub payload: AuditPayload,
}

impl AppendRequest {
    pub fn new(
        action_type: ActionType,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        actor_id: impl Into<String>,
        payload: AuditPayload,
    ) -> Self {
        Self {
            action_type,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            actor_id: actor_id.into(),
            payload,
        }
    }
}

// ============================================================================
// AUDIT BLOCK
// ============================================================================

/// One immutable record in a hash chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditBlock {
    /// Position in the chain; 0 for genesis.
    pub index: u64,
    /// When the action was recorded, at microsecond precision.
    pub timestamp: Timestamp,
    pub action_type: ActionType,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: String,
    pub payload: AuditPayload,
    /// Hash of the previous block, or [`BlockHash::GENESIS`].
    pub previous_hash: BlockHash,
    /// Hash of this block's canonical encoding.
    pub hash: BlockHash,
    /// Canonical encoding version the hash was computed with.
    pub canon_version: u16,
}

impl AuditBlock {
    /// Build and hash a block.
    pub fn seal(
        index: u64,
        previous_hash: BlockHash,
        timestamp: Timestamp,
        request: AppendRequest,
    ) -> Result<Self, AuditError> {
        let mut block = Self {
            index,
            timestamp: truncate_to_micros(timestamp),
            action_type: request.action_type,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            actor_id: request.actor_id,
            payload: request.payload,
            previous_hash,
            // Not part of the hashed content.
            hash: BlockHash::GENESIS,
            canon_version: CANON_VERSION,
        };
        block.hash = compute_block_hash(&block)?;
        Ok(block)
    }

    /// Build and hash the block that follows `head` (or the genesis block).
    pub fn next(
        head: Option<ChainHead>,
        timestamp: Timestamp,
        request: AppendRequest,
    ) -> Result<Self, AuditError> {
        match head {
            Some(head) => Self::seal(head.next_index(), head.hash, timestamp, request),
            None => Self::seal(0, BlockHash::GENESIS, timestamp, request),
        }
    }

    /// Check if this is the first block of its chain.
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash.is_genesis()
    }

    /// This block as a chain head.
    pub fn head(&self) -> ChainHead {
        ChainHead {
            index: self.index,
            hash: self.hash,
        }
    }

    /// Timestamp as it appears in the canonical encoding.
    pub fn timestamp_text(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn request() -> AppendRequest {
        AppendRequest::new(
            ActionType::Approve,
            "surgery_request",
            "SR-2026-0042",
            "user:dr.almeida",
            AuditPayload::Decision {
                approved: true,
                reason: Some("within coverage".to_string()),
            },
        )
    }

    #[test]
    fn test_block_hash_hex_round_trip() {
        let hash = BlockHash([0xab; 32]);
        let text = hash.to_hex();
        assert_eq!(text.len(), 64);
        assert_eq!(BlockHash::from_hex(&text).unwrap(), hash);
        assert!(BlockHash::from_hex("zz").is_err());
        assert!(BlockHash::GENESIS.is_genesis());
    }

    #[test]
    fn test_block_hash_serializes_as_hex_string() {
        let json = serde_json::to_string(&BlockHash::GENESIS).unwrap();
        assert_eq!(json, format!("\"{}\"", "0".repeat(64)));
    }

    #[test]
    fn test_genesis_block() {
        let block = AuditBlock::next(None, Utc::now(), request()).unwrap();
        assert_eq!(block.index, 0);
        assert!(block.is_genesis());
        assert!(!block.hash.is_genesis());
        assert_eq!(block.canon_version, CANON_VERSION);
    }

    #[test]
    fn test_next_block_links_to_head() {
        let genesis = AuditBlock::next(None, Utc::now(), request()).unwrap();
        let second = AuditBlock::next(Some(genesis.head()), Utc::now(), request()).unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.previous_hash, genesis.hash);
        assert_ne!(second.hash, genesis.hash);
    }

    #[test]
    fn test_seal_truncates_timestamp() {
        let ts = DateTime::from_timestamp(1_790_000_000, 987_654_321).unwrap();
        let block = AuditBlock::seal(0, BlockHash::GENESIS, ts, request()).unwrap();
        assert_eq!(block.timestamp.timestamp_subsec_nanos(), 987_654_000);
        assert_eq!(block.timestamp_text(), "2026-09-21T14:13:20.987654Z");
    }

    #[test]
    fn test_partition_display() {
        assert_eq!(ChainPartition::Global.to_string(), "global");
        let id = uuid::Uuid::nil();
        assert_eq!(
            ChainPartition::tenant(id).to_string(),
            "tenant:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_action_type_names_match_serde() {
        for action in ActionType::ALL {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json, serde_json::Value::String(action.as_str().to_string()));
        }
    }
}
