//! `VoiceSession`: the in-memory, per-WS-connection record owned exclusively
//! by the voice gateway (C4) and referenced by weak handle from the realtime
//! provider adapter (C3) and the orchestrator (C7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claims extracted from the identity token (C1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAuth {
    pub tenant_id: String,
    pub site_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

/// Session lifecycle state. `error` is reachable from any state; `paused`
/// only from `listening`/`speaking`; `ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Initializing,
    Listening,
    Processing,
    Speaking,
    Paused,
    Ended,
    Error,
}

impl SessionState {
    /// Whether `target` is a legal transition from `self`, per the C4 session state machine
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        match (self, target) {
            (_, Error) => true,
            (Ended, _) => false,
            (Initializing, Listening) => true,
            (Listening, Processing) => true,
            (Listening, Paused) => true,
            (Processing, Speaking) => true,
            (Processing, Listening) => true,
            (Speaking, Listening) => true,
            (Speaking, Paused) => true,
            (Paused, Listening) => true,
            (Paused, Speaking) => true,
            (_, Ended) => true,
            _ => false,
        }
    }
}

/// The per-connection voice session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSession {
    pub session_id: String,
    pub auth: SessionAuth,
    pub state: SessionState,
    pub is_recording: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Deadline for the next expected pong; session closes with `PING_TIMEOUT` if missed 3 times
    #[serde(default)]
    pub ping_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub missed_pongs: u32,
    #[serde(default)]
    pub first_token_at: Option<DateTime<Utc>>,
    pub total_frames_in: u64,
    pub total_frames_out: u64,
    /// Opaque handle identifying this session's realtime provider connection, if any
    #[serde(default)]
    pub provider_handle: Option<String>,
}

impl VoiceSession {
    pub fn new(session_id: impl Into<String>, auth: SessionAuth) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            auth,
            state: SessionState::Initializing,
            is_recording: false,
            created_at: now,
            last_activity_at: now,
            ping_deadline: None,
            missed_pongs: 0,
            first_token_at: None,
            total_frames_in: 0,
            total_frames_out: 0,
            provider_handle: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    pub fn is_idle(&self, max_idle: chrono::Duration) -> bool {
        Utc::now() - self.last_activity_at > max_idle
    }

    /// Attempt a state transition, returning whether it was legal and applied
    pub fn transition(&mut self, target: SessionState) -> bool {
        if self.state.can_transition_to(target) {
            self.state = target;
            self.touch();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reachable_from_any_state() {
        for state in [
            SessionState::Initializing,
            SessionState::Listening,
            SessionState::Processing,
            SessionState::Speaking,
            SessionState::Paused,
        ] {
            assert!(state.can_transition_to(SessionState::Error));
        }
    }

    #[test]
    fn ended_is_terminal() {
        assert!(!SessionState::Ended.can_transition_to(SessionState::Listening));
    }

    #[test]
    fn paused_only_from_listening_or_speaking() {
        assert!(SessionState::Listening.can_transition_to(SessionState::Paused));
        assert!(SessionState::Speaking.can_transition_to(SessionState::Paused));
        assert!(!SessionState::Initializing.can_transition_to(SessionState::Paused));
    }
}
