//! C4's session registry. Purely in-memory and owned exclusively by the
//! gateway process — `voice_agent_persistence` deliberately has no session
//! store, so a `VoiceSession` lives only as long as its WebSocket connection.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use parking_lot::RwLock;
use voice_agent_core::{SessionAuth, VoiceSession};

/// What kind of answer the orchestrator is waiting on for a given session,
/// tracked alongside the registry rather than on `VoiceSession` itself since
/// it's gateway bookkeeping, not session-lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingTurn {
    #[default]
    None,
    Clarification,
    Confirmation,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<RwLock<VoiceSession>>>,
    pending: DashMap<String, PendingTurn>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, session_id: impl Into<String>, auth: SessionAuth) -> Arc<RwLock<VoiceSession>> {
        let session_id = session_id.into();
        let session = Arc::new(RwLock::new(VoiceSession::new(session_id.clone(), auth)));
        self.sessions.insert(session_id, Arc::clone(&session));
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<RwLock<VoiceSession>>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
        self.pending.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn pending(&self, session_id: &str) -> PendingTurn {
        self.pending.get(session_id).map(|p| *p).unwrap_or_default()
    }

    pub fn set_pending(&self, session_id: &str, pending: PendingTurn) {
        self.pending.insert(session_id.to_string(), pending);
    }

    pub fn clear_pending(&self, session_id: &str) {
        self.pending.remove(session_id);
    }

    /// Drops sessions idle past `max_idle` or past their missed-pong budget.
    /// Returns the evicted session ids so the caller can log/account for them.
    pub fn sweep(&self, max_idle: Duration, max_missed_pongs: u32) -> Vec<String> {
        let mut evicted = Vec::new();
        self.sessions.retain(|id, session| {
            let guard = session.read();
            let keep = !guard.is_idle(max_idle) && guard.missed_pongs <= max_missed_pongs;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        for id in &evicted {
            self.pending.remove(id);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> SessionAuth {
        SessionAuth { tenant_id: "t1".into(), site_id: "s1".into(), user_id: None, locale: None }
    }

    #[test]
    fn create_then_get_roundtrips() {
        let registry = SessionRegistry::new();
        registry.create("sess-1", auth());
        assert!(registry.get("sess-1").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_clears_pending_too() {
        let registry = SessionRegistry::new();
        registry.create("sess-1", auth());
        registry.set_pending("sess-1", PendingTurn::Confirmation);
        registry.remove("sess-1");
        assert!(registry.get("sess-1").is_none());
        assert_eq!(registry.pending("sess-1"), PendingTurn::None);
    }

    #[test]
    fn sweep_evicts_only_idle_sessions() {
        let registry = SessionRegistry::new();
        registry.create("fresh", auth());
        let evicted = registry.sweep(Duration::minutes(5), 3);
        assert!(evicted.is_empty());
        assert_eq!(registry.len(), 1);
    }
}
