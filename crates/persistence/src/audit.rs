//! Durable half of the compliance audit trail: persists the hash-chained
//! `AuditEntry` rows produced by `voice_agent_security::AuditChain`.
//! Partitioned by `(partition_date, session_id)` so a compliance query for
//! "everything that happened in this session on this day" is a single
//! partition read; retained for the configured TTL (default ~7 years).

use async_trait::async_trait;
use chrono::Utc;
use voice_agent_core::{Actor, AuditEntry, AuditOutcome};

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), PersistenceError>;
    async fn query_session(&self, session_id: &str, date: chrono::NaiveDate) -> Result<Vec<AuditEntry>, PersistenceError>;
}

#[derive(Clone)]
pub struct ScyllaAuditLog {
    client: ScyllaClient,
}

impl ScyllaAuditLog {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AuditLog for ScyllaAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<(), PersistenceError> {
        let keyspace = self.client.keyspace();
        let query = format!(
            "INSERT INTO {keyspace}.audit_log (partition_date, session_id, timestamp, id, event_type, actor_type, actor_id, resource_type, resource_id, action, outcome, details_json, previous_hash, hash) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let partition_date = entry.timestamp.date_naive().to_string();
        let outcome = match entry.outcome {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Denied => "denied",
        };
        let details_json = serde_json::to_string(&entry.details)?;
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    partition_date,
                    entry.session_id.clone().unwrap_or_default(),
                    entry.timestamp.timestamp_millis(),
                    entry.id,
                    &entry.event_type,
                    &entry.actor.actor_type,
                    &entry.actor.id,
                    &entry.resource_type,
                    &entry.resource_id,
                    &entry.action,
                    outcome,
                    details_json,
                    &entry.previous_hash,
                    &entry.hash,
                ),
            )
            .await?;
        Ok(())
    }

    async fn query_session(&self, session_id: &str, date: chrono::NaiveDate) -> Result<Vec<AuditEntry>, PersistenceError> {
        let keyspace = self.client.keyspace();
        let query = format!(
            "SELECT timestamp, id, event_type, actor_type, actor_id, resource_type, resource_id, action, outcome, details_json, previous_hash, hash FROM {keyspace}.audit_log WHERE partition_date = ? AND session_id = ?"
        );
        let result = self.client.session().query_unpaged(query, (date.to_string(), session_id)).await?;
        let Some(rows) = result.rows else { return Ok(Vec::new()) };

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let (
                timestamp,
                id,
                event_type,
                actor_type,
                actor_id,
                resource_type,
                resource_id,
                action,
                outcome,
                details_json,
                previous_hash,
                hash,
            ): (
                i64,
                uuid::Uuid,
                String,
                String,
                String,
                Option<String>,
                Option<String>,
                String,
                String,
                String,
                Option<String>,
                Option<String>,
            ) = row.into_typed()?;

            entries.push(AuditEntry {
                id,
                timestamp: chrono::DateTime::<Utc>::from_timestamp_millis(timestamp).unwrap_or_else(Utc::now),
                session_id: Some(session_id.to_string()),
                event_type,
                actor: Actor { actor_type, id: actor_id },
                resource_type,
                resource_id,
                action,
                outcome: match outcome.as_str() {
                    "success" => AuditOutcome::Success,
                    "denied" => AuditOutcome::Denied,
                    _ => AuditOutcome::Failure,
                },
                details: serde_json::from_str(&details_json)?,
                previous_hash,
                hash,
            });
        }
        Ok(entries)
    }
}
