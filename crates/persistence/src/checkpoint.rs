//! Durable checkpoint storage for `TurnState`, keyed by `sessionId`. The
//! orchestrator (C7) is the only writer; the gateway (C4) never reads this
//! directly. Any store satisfying `TurnStateStore` suffices per the design
//! notes — this is the ScyllaDB implementation, serializing the whole
//! `TurnState` as one JSON document per row rather than modeling its fields
//! as columns, since the orchestrator is the only consumer and the shape
//! evolves with the node graph.

use async_trait::async_trait;
use chrono::Utc;
use voice_agent_core::TurnState;

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

#[async_trait]
pub trait TurnStateStore: Send + Sync {
    async fn save(&self, state: &TurnState) -> Result<(), PersistenceError>;
    async fn load(&self, session_id: &str) -> Result<Option<TurnState>, PersistenceError>;
    async fn clear(&self, session_id: &str) -> Result<(), PersistenceError>;
}

#[derive(Clone)]
pub struct ScyllaTurnStateStore {
    client: ScyllaClient,
}

impl ScyllaTurnStateStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TurnStateStore for ScyllaTurnStateStore {
    async fn save(&self, state: &TurnState) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.turn_state_checkpoints (session_id, turn_id, state_json, updated_at) VALUES (?, ?, ?, ?)",
            self.client.keyspace()
        );
        let state_json = serde_json::to_string(state)?;
        self.client
            .session()
            .query_unpaged(query, (&state.session_id, &state.turn_id, state_json, Utc::now().timestamp_millis()))
            .await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<TurnState>, PersistenceError> {
        let query = format!(
            "SELECT state_json FROM {}.turn_state_checkpoints WHERE session_id = ?",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(query, (session_id,)).await?;
        let Some(rows) = result.rows else { return Ok(None) };
        let Some(row) = rows.into_iter().next() else { return Ok(None) };
        let (state_json,): (String,) = row.into_typed()?;
        Ok(Some(serde_json::from_str(&state_json)?))
    }

    async fn clear(&self, session_id: &str) -> Result<(), PersistenceError> {
        let query = format!("DELETE FROM {}.turn_state_checkpoints WHERE session_id = ?", self.client.keyspace());
        self.client.session().query_unpaged(query, (session_id,)).await?;
        Ok(())
    }
}

/// In-memory store used in tests and for local development without a
/// ScyllaDB cluster.
#[derive(Default)]
pub struct InMemoryTurnStateStore {
    states: parking_lot::Mutex<std::collections::HashMap<String, TurnState>>,
}

#[async_trait]
impl TurnStateStore for InMemoryTurnStateStore {
    async fn save(&self, state: &TurnState) -> Result<(), PersistenceError> {
        self.states.lock().insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<TurnState>, PersistenceError> {
        Ok(self.states.lock().get(session_id).cloned())
    }

    async fn clear(&self, session_id: &str) -> Result<(), PersistenceError> {
        self.states.lock().remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryTurnStateStore::default();
        let state = TurnState::new("sess-1", "turn-1", "hello");
        store.save(&state).await.unwrap();
        let loaded = store.load("sess-1").await.unwrap().unwrap();
        assert_eq!(loaded.user_input, "hello");
        store.clear("sess-1").await.unwrap();
        assert!(store.load("sess-1").await.unwrap().is_none());
    }
}
