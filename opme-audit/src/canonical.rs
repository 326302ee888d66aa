//! Canonical block encoding and hashing.
//!
//! # Encoding v1
//!
//! ```text
//! opme-audit-block/v1\n
//! index:<len>:<decimal>\n
//! timestamp:<len>:<RFC 3339, microseconds, Z>\n
//! action_type:<len>:<snake_case>\n
//! entity_type:<len>:<text>\n
//! entity_id:<len>:<text>\n
//! actor_id:<len>:<text>\n
//! payload:<len>:<canonical JSON>\n
//! previous_hash:<len>:<lower-case hex>\n
//! ```
//!
//! `<len>` is the byte length of the value, so no value can be forged by
//! embedding separators. Canonical JSON has object keys sorted and no
//! whitespace. The block hash is SHA-256 over these bytes; `hash` and the
//! partition are not part of the input.
//!
//! Appends and every verifier go through [`compute_block_hash`].

use std::fmt::Write as _;

use opme_core::AuditError;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::block::{AuditBlock, BlockHash};

/// Current canonical encoding version.
pub const CANON_VERSION: u16 = 1;

/// Name of the hash algorithm, as written into export bundles.
pub const HASH_ALGORITHM: &str = "sha256";

const HEADER_V1: &str = "opme-audit-block/v1\n";

fn push_field(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.push(b':');
    out.extend_from_slice(value.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(value.as_bytes());
    out.push(b'\n');
}

/// Canonical v1 bytes of a block.
pub fn encode_v1(block: &AuditBlock) -> Result<Vec<u8>, AuditError> {
    let payload = serde_json::to_value(&block.payload).map_err(|e| AuditError::Encoding {
        reason: format!("payload of block {}: {}", block.index, e),
    })?;
    let payload = canonical_json(&payload)?;

    let mut out = Vec::with_capacity(HEADER_V1.len() + 256 + payload.len());
    out.extend_from_slice(HEADER_V1.as_bytes());
    push_field(&mut out, "index", &block.index.to_string());
    push_field(&mut out, "timestamp", &block.timestamp_text());
    push_field(&mut out, "action_type", block.action_type.as_str());
    push_field(&mut out, "entity_type", &block.entity_type);
    push_field(&mut out, "entity_id", &block.entity_id);
    push_field(&mut out, "actor_id", &block.actor_id);
    push_field(&mut out, "payload", &payload);
    push_field(&mut out, "previous_hash", &block.previous_hash.to_hex());
    Ok(out)
}

/// Recompute a block's hash from its content.
///
/// Fails for an unknown `canon_version`.
pub fn compute_block_hash(block: &AuditBlock) -> Result<BlockHash, AuditError> {
    let bytes = match block.canon_version {
        1 => encode_v1(block)?,
        other => {
            return Err(AuditError::Encoding {
                reason: format!(
                    "block {} uses unsupported canon version {}",
                    block.index, other
                ),
            })
        }
    };
    let digest = Sha256::digest(&bytes);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    Ok(BlockHash(hash))
}

/// Serialize a JSON value with sorted object keys and no whitespace.
pub fn canonical_json(value: &Value) -> Result<String, AuditError> {
    let mut out = String::new();
    write_value(&mut out, value)?;
    Ok(out)
}

fn write_value(out: &mut String, value: &Value) -> Result<(), AuditError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            write!(out, "{}", n).map_err(fmt_err)?;
        }
        Value::String(s) => write_string(out, s)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key)?;
                out.push(':');
                write_value(out, item)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_string(out: &mut String, s: &str) -> Result<(), AuditError> {
    let quoted = serde_json::to_string(s).map_err(|e| AuditError::Encoding {
        reason: e.to_string(),
    })?;
    out.push_str(&quoted);
    Ok(())
}

fn fmt_err(e: std::fmt::Error) -> AuditError {
    AuditError::Encoding {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ActionType, AppendRequest};
    use crate::payload::AuditPayload;
    use chrono::DateTime;
    use serde_json::json;

    fn fixed_block() -> AuditBlock {
        let ts = DateTime::from_timestamp(1_790_000_000, 5_000).unwrap();
        AuditBlock::seal(
            3,
            BlockHash([0x11; 32]),
            ts,
            AppendRequest::new(
                ActionType::Update,
                "product",
                "P-100",
                "user:ana",
                AuditPayload::Updated {
                    changes: vec![crate::payload::FieldChange::new(
                        "stock",
                        json!(4),
                        json!(3),
                    )],
                },
            ),
        )
        .unwrap()
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = canonical_json(&json!({"b": 1, "a": {"d": [1, 2], "c": null}})).unwrap();
        assert_eq!(a, r#"{"a":{"c":null,"d":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_escapes_strings() {
        let s = canonical_json(&json!({"k": "line\nbreak \"quoted\""})).unwrap();
        assert_eq!(s, r#"{"k":"line\nbreak \"quoted\""}"#);
    }

    #[test]
    fn test_encode_v1_layout() {
        let block = fixed_block();
        let text = String::from_utf8(encode_v1(&block).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "opme-audit-block/v1");
        assert_eq!(lines[1], "index:1:3");
        assert_eq!(lines[2], "timestamp:27:2026-09-21T14:13:20.000005Z");
        assert_eq!(lines[3], "action_type:6:update");
        assert_eq!(lines[4], "entity_type:7:product");
        assert_eq!(lines[5], "entity_id:5:P-100");
        assert_eq!(lines[6], "actor_id:8:user:ana");
        assert!(lines[7].starts_with("payload:"));
        assert!(lines[7]
            .ends_with(r#"{"changes":[{"after":3,"before":4,"field":"stock"}],"kind":"updated"}"#));
        assert_eq!(lines[8], format!("previous_hash:64:{}", "11".repeat(32)));
        assert_eq!(lines.len(), 9);
    }

    #[test]
    fn test_length_prefix_separates_fields() {
        let mut a = fixed_block();
        let mut b = fixed_block();
        a.entity_type = "product\nentity_id:1:x".to_string();
        a.entity_id = String::new();
        b.entity_type = "product".to_string();
        b.entity_id = "x".to_string();
        assert_ne!(compute_block_hash(&a).unwrap(), compute_block_hash(&b).unwrap());
    }

    #[test]
    fn test_hash_is_deterministic_and_ignores_stored_hash() {
        let block = fixed_block();
        let mut copy = block.clone();
        copy.hash = BlockHash::GENESIS;
        assert_eq!(compute_block_hash(&copy).unwrap(), block.hash);
    }

    #[test]
    fn test_every_field_feeds_the_hash() {
        let block = fixed_block();
        let mutations: Vec<Box<dyn Fn(&mut AuditBlock)>> = vec![
            Box::new(|b| b.index += 1),
            Box::new(|b| b.timestamp += chrono::Duration::microseconds(1)),
            Box::new(|b| b.action_type = ActionType::Delete),
            Box::new(|b| b.entity_type.push('s')),
            Box::new(|b| b.entity_id.push('0')),
            Box::new(|b| b.actor_id = "user:bia".to_string()),
            Box::new(|b| b.payload = AuditPayload::note("edited")),
            Box::new(|b| b.previous_hash = BlockHash::GENESIS),
        ];
        for mutate in mutations {
            let mut tampered = block.clone();
            mutate(&mut tampered);
            assert_ne!(compute_block_hash(&tampered).unwrap(), block.hash);
        }
    }

    #[test]
    fn test_unknown_canon_version_is_rejected() {
        let mut block = fixed_block();
        block.canon_version = 2;
        assert!(matches!(
            compute_block_hash(&block),
            Err(AuditError::Encoding { .. })
        ));
    }
}
