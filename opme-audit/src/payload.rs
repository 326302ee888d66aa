//! Audit payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One changed field in an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Value,
    pub after: Value,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, before: Value, after: Value) -> Self {
        Self {
            field: field.into(),
            before,
            after,
        }
    }
}

/// Action-specific detail carried by an audit block.
///
/// Serialized with a `kind` tag. The hash covers the canonical JSON of this
/// value, so field names here are part of the chain format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditPayload {
    /// Snapshot of a newly created entity.
    Created { snapshot: Value },
    /// Field-level diff.
    Updated { changes: Vec<FieldChange> },
    Deleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Outcome of an approval step.
    Decision {
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Read access to sensitive data (patient records, price tables).
    Access {
        resource: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        purpose: Option<String>,
    },
    Export {
        format: String,
        record_count: u64,
    },
    ComplianceCheck {
        rule: String,
        passed: bool,
        #[serde(default)]
        findings: Vec<String>,
    },
    Note { text: String },
    /// Payload in a format this version does not model.
    Opaque {
        content_type: String,
        #[serde(with = "hex_bytes")]
        bytes: Vec<u8>,
    },
}

impl AuditPayload {
    /// Tag name, as it appears in the `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditPayload::Created { .. } => "created",
            AuditPayload::Updated { .. } => "updated",
            AuditPayload::Deleted { .. } => "deleted",
            AuditPayload::Decision { .. } => "decision",
            AuditPayload::Access { .. } => "access",
            AuditPayload::Export { .. } => "export",
            AuditPayload::ComplianceCheck { .. } => "compliance_check",
            AuditPayload::Note { .. } => "note",
            AuditPayload::Opaque { .. } => "opaque",
        }
    }

    pub fn note(text: impl Into<String>) -> Self {
        AuditPayload::Note { text: text.into() }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
