//! `OutboxStore`: the durable side of C10. `append` is meant to be called in
//! the same business-state transaction that produced the domain event (the
//! transactional-outbox pattern); everything downstream of that call
//! (claiming, publishing, retrying) lives in `voice-agent-outbox`, which only
//! ever sees this trait, not ScyllaDB directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use voice_agent_core::{OutboxRecord, OutboxStatus};

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Appends a new pending record to all three index tables.
    async fn append(&self, record: &OutboxRecord) -> Result<(), PersistenceError>;

    /// Atomically claims up to `batch_size` pending rows by moving them to
    /// `publishing`. Conditional (`IF status = 'pending'`) so two publisher
    /// instances racing on the same row only one wins.
    async fn claim_batch(&self, batch_size: u32) -> Result<Vec<OutboxRecord>, PersistenceError>;

    async fn mark_published(&self, record: &OutboxRecord) -> Result<(), PersistenceError>;

    /// Failure path: bumps `attempts`, sets `error`, and moves the row back
    /// to `pending` with `next_attempt_at` set to the caller's computed
    /// backoff deadline (`claim_batch` won't re-offer it before then), or to
    /// `dead_letter` once `attempts` reaches `maxAttempts`.
    async fn mark_failed(&self, record: &OutboxRecord, error: &str, next_attempt_at: DateTime<Utc>) -> Result<(), PersistenceError>;

    /// Rows stuck in `publishing` older than `claim_lease` (a crashed
    /// publisher never finished them) get reclaimed to `pending`.
    async fn reap_stale_claims(&self, claim_lease: chrono::Duration) -> Result<u32, PersistenceError>;

    /// Rows that have sat in `pending` longer than `stale_after` — flagged,
    /// not mutated, per the spec's "stale detection" note.
    async fn find_stale_pending(&self, stale_after: chrono::Duration) -> Result<Vec<OutboxRecord>, PersistenceError>;
}

#[derive(Clone)]
pub struct ScyllaOutboxStore {
    client: ScyllaClient,
}

impl ScyllaOutboxStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    async fn write_indexes(&self, record: &OutboxRecord) -> Result<(), PersistenceError> {
        let keyspace = self.client.keyspace();
        let payload_json = serde_json::to_string(&record.payload)?;

        if let Some(correlation_id) = &record.correlation_id {
            let query = format!(
                "INSERT INTO {keyspace}.outbox_by_correlation (correlation_id, created_at, id, tenant_id, aggregate, aggregate_id, type, status) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
            );
            self.client
                .session()
                .query_unpaged(
                    query,
                    (
                        correlation_id,
                        record.created_at.timestamp_millis(),
                        record.id,
                        &record.tenant_id,
                        &record.aggregate,
                        &record.aggregate_id,
                        &record.event_type,
                        record.status.as_str(),
                    ),
                )
                .await?;
        }

        let agg_query = format!(
            "INSERT INTO {keyspace}.outbox_by_aggregate (aggregate, aggregate_id, created_at, id, tenant_id, type, payload_json, status) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );
        self.client
            .session()
            .query_unpaged(
                agg_query,
                (
                    &record.aggregate,
                    &record.aggregate_id,
                    record.created_at.timestamp_millis(),
                    record.id,
                    &record.tenant_id,
                    &record.event_type,
                    payload_json,
                    record.status.as_str(),
                ),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for ScyllaOutboxStore {
    async fn append(&self, record: &OutboxRecord) -> Result<(), PersistenceError> {
        let keyspace = self.client.keyspace();
        let payload_json = serde_json::to_string(&record.payload)?;
        let query = format!(
            "INSERT INTO {keyspace}.outbox_events (status, created_at, id, tenant_id, aggregate, aggregate_id, type, payload_json, correlation_id, published_at, attempts, max_attempts, last_attempt_at, next_attempt_at, error) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    record.status.as_str(),
                    record.created_at.timestamp_millis(),
                    record.id,
                    &record.tenant_id,
                    &record.aggregate,
                    &record.aggregate_id,
                    &record.event_type,
                    payload_json,
                    &record.correlation_id,
                    record.published_at.map(|t| t.timestamp_millis()),
                    record.attempts as i32,
                    record.max_attempts as i32,
                    record.last_attempt_at.map(|t| t.timestamp_millis()),
                    record.next_attempt_at.map(|t| t.timestamp_millis()),
                    &record.error,
                ),
            )
            .await?;
        self.write_indexes(record).await?;
        Ok(())
    }

    async fn claim_batch(&self, batch_size: u32) -> Result<Vec<OutboxRecord>, PersistenceError> {
        let keyspace = self.client.keyspace();
        // Over-fetches past `batch_size` since rows still serving out their
        // backoff delay are filtered out in-process (Scylla has no secondary
        // index on `next_attempt_at` to push this filter down to the query).
        let select = format!(
            "SELECT status, created_at, id, tenant_id, aggregate, aggregate_id, type, payload_json, correlation_id, published_at, attempts, max_attempts, last_attempt_at, next_attempt_at, error FROM {keyspace}.outbox_events WHERE status = ? LIMIT ?"
        );
        let result = self
            .client
            .session()
            .query_unpaged(select, (OutboxStatus::Pending.as_str(), (batch_size * 4).max(batch_size) as i32))
            .await?;
        let Some(rows) = result.rows else { return Ok(Vec::new()) };

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(batch_size as usize);
        for row in rows {
            if claimed.len() >= batch_size as usize {
                break;
            }
            let record = row_to_record(row)?;
            if record.next_attempt_at.map(|t| t > now).unwrap_or(false) {
                continue;
            }
            if self.try_claim(&record).await? {
                let mut claimed_record = record;
                claimed_record.status = OutboxStatus::Publishing;
                claimed_record.last_attempt_at = Some(now);
                claimed.push(claimed_record);
            }
        }
        Ok(claimed)
    }

    async fn mark_published(&self, record: &OutboxRecord) -> Result<(), PersistenceError> {
        let keyspace = self.client.keyspace();
        let now = Utc::now();
        self.delete_from(OutboxStatus::Publishing, record).await?;
        let mut published = record.clone();
        published.status = OutboxStatus::Published;
        published.published_at = Some(now);
        self.insert_into_events(&published).await?;

        let update_agg = format!(
            "UPDATE {keyspace}.outbox_by_aggregate SET status = ? WHERE aggregate = ? AND aggregate_id = ? AND created_at = ? AND id = ?"
        );
        self.client
            .session()
            .query_unpaged(
                update_agg,
                (
                    OutboxStatus::Published.as_str(),
                    &record.aggregate,
                    &record.aggregate_id,
                    record.created_at.timestamp_millis(),
                    record.id,
                ),
            )
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, record: &OutboxRecord, error: &str, next_attempt_at: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.delete_from(OutboxStatus::Publishing, record).await?;
        let mut failed = record.clone();
        failed.attempts += 1;
        failed.error = Some(error.to_string());
        failed.last_attempt_at = Some(Utc::now());
        failed.status = if failed.attempts >= failed.max_attempts {
            OutboxStatus::DeadLetter
        } else {
            OutboxStatus::Pending
        };
        failed.next_attempt_at = (failed.status == OutboxStatus::Pending).then_some(next_attempt_at);
        self.insert_into_events(&failed).await?;
        Ok(())
    }

    async fn reap_stale_claims(&self, claim_lease: chrono::Duration) -> Result<u32, PersistenceError> {
        let keyspace = self.client.keyspace();
        let select = format!(
            "SELECT status, created_at, id, tenant_id, aggregate, aggregate_id, type, payload_json, correlation_id, published_at, attempts, max_attempts, last_attempt_at, next_attempt_at, error FROM {keyspace}.outbox_events WHERE status = ?"
        );
        let result = self
            .client
            .session()
            .query_unpaged(select, (OutboxStatus::Publishing.as_str(),))
            .await?;
        let Some(rows) = result.rows else { return Ok(0) };

        let cutoff = Utc::now() - claim_lease;
        let mut reaped = 0u32;
        for row in rows {
            let record = row_to_record(row)?;
            let stale = record.last_attempt_at.map(|t| t < cutoff).unwrap_or(true);
            if stale {
                self.delete_from(OutboxStatus::Publishing, &record).await?;
                let mut reclaimed = record;
                reclaimed.status = OutboxStatus::Pending;
                reclaimed.next_attempt_at = None;
                self.insert_into_events(&reclaimed).await?;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn find_stale_pending(&self, stale_after: chrono::Duration) -> Result<Vec<OutboxRecord>, PersistenceError> {
        let keyspace = self.client.keyspace();
        let select = format!(
            "SELECT status, created_at, id, tenant_id, aggregate, aggregate_id, type, payload_json, correlation_id, published_at, attempts, max_attempts, last_attempt_at, next_attempt_at, error FROM {keyspace}.outbox_events WHERE status = ?"
        );
        let result = self
            .client
            .session()
            .query_unpaged(select, (OutboxStatus::Pending.as_str(),))
            .await?;
        let Some(rows) = result.rows else { return Ok(Vec::new()) };
        let cutoff = Utc::now() - stale_after;
        let mut stale = Vec::new();
        for row in rows {
            let record = row_to_record(row)?;
            if record.created_at < cutoff {
                stale.push(record);
            }
        }
        Ok(stale)
    }
}

impl ScyllaOutboxStore {
    async fn try_claim(&self, record: &OutboxRecord) -> Result<bool, PersistenceError> {
        let keyspace = self.client.keyspace();
        let delete = format!("DELETE FROM {keyspace}.outbox_events WHERE status = ? AND created_at = ? AND id = ? IF EXISTS");
        let result = self
            .client
            .session()
            .query_unpaged(delete, (OutboxStatus::Pending.as_str(), record.created_at.timestamp_millis(), record.id))
            .await?;
        let applied = result
            .single_row_typed::<(bool,)>()
            .map(|(applied,)| applied)
            .unwrap_or(false);
        if !applied {
            return Ok(false);
        }
        let mut claimed = record.clone();
        claimed.status = OutboxStatus::Publishing;
        claimed.last_attempt_at = Some(Utc::now());
        self.insert_into_events(&claimed).await?;
        Ok(true)
    }

    async fn insert_into_events(&self, record: &OutboxRecord) -> Result<(), PersistenceError> {
        let keyspace = self.client.keyspace();
        let payload_json = serde_json::to_string(&record.payload)?;
        let query = format!(
            "INSERT INTO {keyspace}.outbox_events (status, created_at, id, tenant_id, aggregate, aggregate_id, type, payload_json, correlation_id, published_at, attempts, max_attempts, last_attempt_at, next_attempt_at, error) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    record.status.as_str(),
                    record.created_at.timestamp_millis(),
                    record.id,
                    &record.tenant_id,
                    &record.aggregate,
                    &record.aggregate_id,
                    &record.event_type,
                    payload_json,
                    &record.correlation_id,
                    record.published_at.map(|t| t.timestamp_millis()),
                    record.attempts as i32,
                    record.max_attempts as i32,
                    record.last_attempt_at.map(|t| t.timestamp_millis()),
                    record.next_attempt_at.map(|t| t.timestamp_millis()),
                    &record.error,
                ),
            )
            .await?;
        Ok(())
    }

    async fn delete_from(&self, status: OutboxStatus, record: &OutboxRecord) -> Result<(), PersistenceError> {
        let keyspace = self.client.keyspace();
        let query = format!("DELETE FROM {keyspace}.outbox_events WHERE status = ? AND created_at = ? AND id = ?");
        self.client
            .session()
            .query_unpaged(query, (status.as_str(), record.created_at.timestamp_millis(), record.id))
            .await?;
        Ok(())
    }
}

/// In-memory store used in tests and for local development without a
/// ScyllaDB cluster, mirroring `checkpoint::InMemoryTurnStateStore`.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    records: parking_lot::Mutex<std::collections::HashMap<Uuid, OutboxRecord>>,
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, record: &OutboxRecord) -> Result<(), PersistenceError> {
        self.records.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn claim_batch(&self, batch_size: u32) -> Result<Vec<OutboxRecord>, PersistenceError> {
        let mut records = self.records.lock();
        let now = Utc::now();
        let ids: Vec<Uuid> = records
            .values()
            .filter(|r| r.status == OutboxStatus::Pending && r.next_attempt_at.map(|t| t <= now).unwrap_or(true))
            .take(batch_size as usize)
            .map(|r| r.id)
            .collect();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = records.get_mut(&id) {
                record.status = OutboxStatus::Publishing;
                record.last_attempt_at = Some(now);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_published(&self, record: &OutboxRecord) -> Result<(), PersistenceError> {
        if let Some(stored) = self.records.lock().get_mut(&record.id) {
            stored.status = OutboxStatus::Published;
            stored.published_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, record: &OutboxRecord, error: &str, next_attempt_at: DateTime<Utc>) -> Result<(), PersistenceError> {
        if let Some(stored) = self.records.lock().get_mut(&record.id) {
            stored.attempts += 1;
            stored.error = Some(error.to_string());
            stored.last_attempt_at = Some(Utc::now());
            stored.status = if stored.attempts >= stored.max_attempts {
                OutboxStatus::DeadLetter
            } else {
                OutboxStatus::Pending
            };
            stored.next_attempt_at = (stored.status == OutboxStatus::Pending).then_some(next_attempt_at);
        }
        Ok(())
    }

    async fn reap_stale_claims(&self, claim_lease: chrono::Duration) -> Result<u32, PersistenceError> {
        let cutoff = Utc::now() - claim_lease;
        let mut reaped = 0u32;
        for record in self.records.lock().values_mut() {
            if record.status == OutboxStatus::Publishing && record.last_attempt_at.map(|t| t < cutoff).unwrap_or(true) {
                record.status = OutboxStatus::Pending;
                record.next_attempt_at = None;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn find_stale_pending(&self, stale_after: chrono::Duration) -> Result<Vec<OutboxRecord>, PersistenceError> {
        let cutoff = Utc::now() - stale_after;
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.status == OutboxStatus::Pending && r.created_at < cutoff)
            .cloned()
            .collect())
    }
}

/// Lets a type-erased store satisfy the generic `OutboxStore` bound that
/// `voice-agent-agent` and `voice-agent-outbox` are written against, so the
/// server's composition root can pick Scylla or in-memory at startup without
/// making every collaborator generic over the choice.
#[async_trait]
impl OutboxStore for std::sync::Arc<dyn OutboxStore> {
    async fn append(&self, record: &OutboxRecord) -> Result<(), PersistenceError> {
        (**self).append(record).await
    }

    async fn claim_batch(&self, batch_size: u32) -> Result<Vec<OutboxRecord>, PersistenceError> {
        (**self).claim_batch(batch_size).await
    }

    async fn mark_published(&self, record: &OutboxRecord) -> Result<(), PersistenceError> {
        (**self).mark_published(record).await
    }

    async fn mark_failed(&self, record: &OutboxRecord, error: &str, next_attempt_at: DateTime<Utc>) -> Result<(), PersistenceError> {
        (**self).mark_failed(record, error, next_attempt_at).await
    }

    async fn reap_stale_claims(&self, claim_lease: chrono::Duration) -> Result<u32, PersistenceError> {
        (**self).reap_stale_claims(claim_lease).await
    }

    async fn find_stale_pending(&self, stale_after: chrono::Duration) -> Result<Vec<OutboxRecord>, PersistenceError> {
        (**self).find_stale_pending(stale_after).await
    }
}

fn row_to_record(row: scylla::frame::response::result::Row) -> Result<OutboxRecord, PersistenceError> {
    let (
        status,
        created_at,
        id,
        tenant_id,
        aggregate,
        aggregate_id,
        event_type,
        payload_json,
        correlation_id,
        published_at,
        attempts,
        max_attempts,
        last_attempt_at,
        next_attempt_at,
        error,
    ): (
        String,
        i64,
        Uuid,
        String,
        String,
        String,
        String,
        String,
        Option<String>,
        Option<i64>,
        i32,
        i32,
        Option<i64>,
        Option<i64>,
        Option<String>,
    ) = row.into_typed()?;

    Ok(OutboxRecord {
        id,
        tenant_id,
        aggregate,
        aggregate_id,
        event_type,
        payload: serde_json::from_str(&payload_json)?,
        correlation_id,
        created_at: millis_to_datetime(created_at),
        published_at: published_at.map(millis_to_datetime),
        attempts: attempts as u32,
        max_attempts: max_attempts as u32,
        last_attempt_at: last_attempt_at.map(millis_to_datetime),
        next_attempt_at: next_attempt_at.map(millis_to_datetime),
        error,
        status: status.parse().map_err(PersistenceError::Decode)?,
    })
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_and_consistency_invariants_live_on_the_shared_core_type() {
        let record = OutboxRecord::new("tenant-1", "cart", "cart-1", "cart.item_added", serde_json::json!({}), None);
        assert!(record.is_consistent());
        assert_eq!(record.status, OutboxStatus::Pending);
    }
}
