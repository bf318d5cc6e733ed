//! In-process halves of C6's two audit trails.
//!
//! [`PrivacyAuditRing`] is the lightweight, ring-buffered (capacity N,
//! configurable, default 1000) record of PII/compliance events, read by
//! operators for a live view without touching the database. The durable,
//! hash-chained [`voice_agent_core::AuditEntry`] log is appended to by
//! [`AuditChain`], which only tracks the last-written hash in memory —
//! actual storage is the persistence crate's job.

use std::collections::VecDeque;

use parking_lot::Mutex;
use voice_agent_core::{Actor, AuditEntry, AuditOutcome, PrivacyAuditEntry};

pub struct PrivacyAuditRing {
    capacity: usize,
    entries: Mutex<VecDeque<PrivacyAuditEntry>>,
}

impl PrivacyAuditRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn record(&self, entry: PrivacyAuditEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<PrivacyAuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds successive chain-linked `AuditEntry` rows. Holds only the last
/// hash written — callers persist each returned entry themselves (the
/// persistence crate's `AuditLog` trait) before asking for the next one.
pub struct AuditChain {
    last_hash: Mutex<Option<String>>,
}

impl AuditChain {
    pub fn new(last_hash: Option<String>) -> Self {
        Self { last_hash: Mutex::new(last_hash) }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &self,
        session_id: Option<String>,
        event_type: impl Into<String>,
        actor: Actor,
        resource_type: Option<String>,
        resource_id: Option<String>,
        action: impl Into<String>,
        outcome: AuditOutcome,
        details: serde_json::Value,
    ) -> AuditEntry {
        let mut last_hash = self.last_hash.lock();
        let mut entry = AuditEntry {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            session_id,
            event_type: event_type.into(),
            actor,
            resource_type,
            resource_id,
            action: action.into(),
            outcome,
            details,
            previous_hash: last_hash.clone(),
            hash: None,
        };
        let hash = entry.compute_hash(last_hash.as_deref());
        entry.hash = Some(hash.clone());
        *last_hash = Some(hash);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let ring = PrivacyAuditRing::new(2);
        for i in 0..3 {
            ring.record(PrivacyAuditEntry {
                ts: chrono::Utc::now(),
                action: format!("event-{i}"),
                tenant_id: "tenant-a".to_string(),
                details: serde_json::json!({}),
            });
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].action, "event-1");
        assert_eq!(snapshot[1].action, "event-2");
    }

    #[test]
    fn chain_links_successive_entries() {
        let chain = AuditChain::new(None);
        let actor = Actor { actor_type: "system".to_string(), id: "guard".to_string() };
        let first = chain.append(None, "pii_detected", actor.clone(), None, None, "redact", AuditOutcome::Success, serde_json::json!({}));
        let second = chain.append(None, "pii_detected", actor, None, None, "redact", AuditOutcome::Success, serde_json::json!({}));
        assert_eq!(second.previous_hash, first.hash);
        assert_ne!(first.hash, second.hash);
    }
}
