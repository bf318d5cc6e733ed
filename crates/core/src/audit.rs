//! Audit types. `PrivacyAuditEntry` is the lightweight, ring-buffered record
//! kept in-process by the security crate (C6); `AuditEntry` is the durable,
//! hash-chained record persisted by the persistence crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only, ring-buffered to N=1000 in-process. One entry per
/// `pii_detected` / `compliance_check` / `right_to_erasure` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyAuditEntry {
    pub ts: DateTime<Utc>,
    pub action: String,
    pub tenant_id: String,
    pub details: serde_json::Value,
}

/// Actor that performed an audited action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: String,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Durable, hash-chained audit log record. Each entry's `hash` covers its
/// own fields plus `previousHash`, so tampering with row N breaks the chain
/// for every row after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub event_type: String,
    pub actor: Actor,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    pub action: String,
    pub outcome: AuditOutcome,
    pub details: serde_json::Value,
    #[serde(default)]
    pub previous_hash: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl AuditEntry {
    /// Compute this entry's hash given the previous entry's hash, chaining the log.
    pub fn compute_hash(&self, previous_hash: Option<&str>) -> String {
        use sha2_like::digest_fields;
        digest_fields(&[
            self.id.to_string().as_str(),
            self.timestamp.to_rfc3339().as_str(),
            self.event_type.as_str(),
            self.action.as_str(),
            previous_hash.unwrap_or(""),
        ])
    }
}

/// Tiny dependency-free FNV-1a digest used for the audit hash chain. Not a
/// cryptographic guarantee by itself — the point is tamper-evidence across
/// the append-only log, not collision resistance against an adversary who
/// controls the database.
mod sha2_like {
    pub fn digest_fields(fields: &[&str]) -> String {
        let mut hash: u64 = 0xcbf29ce484222325;
        for field in fields {
            for byte in field.as_bytes() {
                hash ^= *byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            hash ^= 0xff;
        }
        format!("{hash:016x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> AuditEntry {
        AuditEntry {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: Some("sess-1".into()),
            event_type: "pii_detected".into(),
            actor: Actor { actor_type: "system".into(), id: "security-guard".into() },
            resource_type: None,
            resource_id: None,
            action: "redact".into(),
            outcome: AuditOutcome::Success,
            details: serde_json::json!({"types": ["email"]}),
            previous_hash: None,
            hash: None,
        }
    }

    #[test]
    fn chain_hash_changes_with_previous_hash() {
        let entry = sample_entry();
        let h1 = entry.compute_hash(None);
        let h2 = entry.compute_hash(Some("abc"));
        assert_ne!(h1, h2);
    }

    #[test]
    fn chain_hash_is_deterministic() {
        let entry = sample_entry();
        assert_eq!(entry.compute_hash(Some("x")), entry.compute_hash(Some("x")));
    }
}
