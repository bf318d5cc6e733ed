//! C10 Outbox Publisher: polls `outbox_events`, claims a batch, publishes via
//! C11, retries with exponential backoff, and dead-letters exhausted rows.
//!
//! Single-writer-per-aggregate ordering is enforced within a claimed batch:
//! events sharing an `aggregateId` are published strictly in `createdAt`
//! order on one task; different aggregates publish concurrently up to
//! `worker_pool_cap`.

use std::collections::{HashMap, HashMap as Map};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use voice_agent_config::OutboxConfig;
use voice_agent_core::{OutboxRecord, OutboxStatus};
use voice_agent_persistence::OutboxStore;

use crate::sink::{EventSink, SinkError};

/// Maximum number of aggregate-ordered publish chains running concurrently
/// within one poll cycle.
const DEFAULT_WORKER_POOL_CAP: usize = 16;

pub struct Publisher<S: OutboxStore, K: EventSink> {
    store: Arc<S>,
    sink: Arc<K>,
    config: OutboxConfig,
    worker_pool_cap: usize,
}

impl<S: OutboxStore + 'static, K: EventSink + 'static> Publisher<S, K> {
    pub fn new(store: Arc<S>, sink: Arc<K>, config: OutboxConfig) -> Self {
        Self { store, sink, config, worker_pool_cap: DEFAULT_WORKER_POOL_CAP }
    }

    /// Runs one poll-claim-publish cycle, returning how many rows were
    /// published and how many were dead-lettered.
    pub async fn run_once(&self) -> crate::error::Result<PollOutcome> {
        let claimed = self.store.claim_batch(self.config.batch_size as u32).await?;
        if claimed.is_empty() {
            return Ok(PollOutcome::default());
        }

        let mut by_aggregate: Map<(String, String), Vec<OutboxRecord>> = HashMap::new();
        for record in claimed {
            by_aggregate
                .entry((record.aggregate.clone(), record.aggregate_id.clone()))
                .or_default()
                .push(record);
        }
        for chain in by_aggregate.values_mut() {
            chain.sort_by_key(|r| r.created_at);
        }

        let chains: Vec<_> = by_aggregate.into_values().collect();
        let mut outcome = PollOutcome::default();

        for group in chains.chunks(self.worker_pool_cap) {
            let futures = group.iter().map(|chain| self.publish_chain(chain));
            let results = futures::future::join_all(futures).await;
            for r in results {
                outcome.published += r.published;
                outcome.dead_lettered += r.dead_lettered;
                outcome.retried += r.retried;
            }
        }

        Ok(outcome)
    }

    /// Publishes one aggregate's events strictly in order; a failure on
    /// event N still lets N+1..end get attempted (each one's retry state is
    /// independent), but N+1 is only published after N's outcome is known.
    async fn publish_chain(&self, chain: &[OutboxRecord]) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        for record in chain {
            match self.publish_one(record).await {
                PublishResult::Published => outcome.published += 1,
                PublishResult::Retried => outcome.retried += 1,
                PublishResult::DeadLettered => outcome.dead_lettered += 1,
            }
        }
        outcome
    }

    async fn publish_one(&self, record: &OutboxRecord) -> PublishResult {
        let topic = record.aggregate.clone();
        let key = record.aggregate_id.clone();
        let mut headers = HashMap::new();
        headers.insert("eventId".to_string(), record.id.to_string());
        headers.insert("eventType".to_string(), record.event_type.clone());
        if let Some(correlation_id) = &record.correlation_id {
            headers.insert("correlationId".to_string(), correlation_id.clone());
        }

        match self.sink.publish(&topic, &key, &record.payload, &headers).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_published(record).await {
                    tracing::error!(error = %e, event_id = %record.id, "failed to mark event published");
                }
                metrics::counter!("outbox_published_total").increment(1);
                PublishResult::Published
            }
            Err(SinkError::Permanent(msg)) => {
                self.dead_letter(record, &msg).await;
                PublishResult::DeadLettered
            }
            Err(SinkError::Retriable(msg)) => {
                let would_exhaust = record.attempts + 1 >= record.max_attempts;
                let delay = record.backoff_delay_ms(self.config.backoff_base_ms, self.config.backoff_cap_ms);
                let next_attempt_at = chrono::Utc::now() + chrono::Duration::milliseconds(delay as i64);
                if let Err(e) = self.store.mark_failed(record, &msg, next_attempt_at).await {
                    tracing::error!(error = %e, event_id = %record.id, "failed to record publish failure");
                }
                if would_exhaust {
                    metrics::counter!("outbox_dead_lettered_total").increment(1);
                    PublishResult::DeadLettered
                } else {
                    tracing::warn!(event_id = %record.id, delay_ms = delay, attempts = record.attempts + 1, "publish failed, will retry after backoff");
                    metrics::counter!("outbox_retry_total").increment(1);
                    PublishResult::Retried
                }
            }
        }
    }

    async fn dead_letter(&self, record: &OutboxRecord, reason: &str) {
        tracing::error!(event_id = %record.id, reason, "event dead-lettered");
        let mut forced = record.clone();
        forced.attempts = forced.max_attempts;
        if let Err(e) = self.store.mark_failed(&forced, reason, chrono::Utc::now()).await {
            tracing::error!(error = %e, event_id = %record.id, "failed to dead-letter event");
        }
        metrics::counter!("outbox_dead_lettered_total").increment(1);
    }

    /// Reclaims rows stuck in `publishing` past the claim lease (a crashed
    /// publisher never finished them) back to `pending`.
    pub async fn reap_stale(&self) -> crate::error::Result<u32> {
        let lease = chrono::Duration::seconds(self.config.claim_lease_secs);
        let reaped = self.store.reap_stale_claims(lease).await?;
        if reaped > 0 {
            tracing::warn!(reaped, "reclaimed stale publishing-state rows");
        }
        Ok(reaped)
    }

    /// Flags (does not mutate) rows that have sat `pending` past
    /// `stale_after_hours`, per the spec's stale-detection note.
    pub async fn find_stale(&self) -> crate::error::Result<Vec<OutboxRecord>> {
        let threshold = chrono::Duration::hours(self.config.stale_after_hours);
        Ok(self.store.find_stale_pending(threshold).await?)
    }

    /// Runs the poll loop until `shutdown` fires, sleeping `poll_interval`
    /// between cycles and reaping stale claims once per cycle.
    pub async fn run(self: Arc<Self>, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reap_stale().await {
                        tracing::error!(error = %e, "stale-claim reap failed");
                    }
                    match self.run_once().await {
                        Ok(outcome) if outcome.published + outcome.dead_lettered + outcome.retried > 0 => {
                            tracing::debug!(?outcome, "outbox poll cycle complete");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "outbox poll cycle failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("outbox publisher shutting down");
                        break;
                    }
                }
            }
        }
    }
}

enum PublishResult {
    Published,
    Retried,
    DeadLettered,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PollOutcome {
    pub published: u32,
    pub retried: u32,
    pub dead_lettered: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemoryEventSink;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        pending: Mutex<Vec<OutboxRecord>>,
        published: Mutex<Vec<OutboxRecord>>,
    }

    #[async_trait::async_trait]
    impl OutboxStore for FakeStore {
        async fn append(&self, record: &OutboxRecord) -> Result<(), voice_agent_persistence::PersistenceError> {
            self.pending.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn claim_batch(&self, batch_size: u32) -> Result<Vec<OutboxRecord>, voice_agent_persistence::PersistenceError> {
            let mut pending = self.pending.lock().unwrap();
            let n = (batch_size as usize).min(pending.len());
            Ok(pending.drain(..n).collect())
        }

        async fn mark_published(&self, record: &OutboxRecord) -> Result<(), voice_agent_persistence::PersistenceError> {
            let mut r = record.clone();
            r.status = OutboxStatus::Published;
            r.published_at = Some(chrono::Utc::now());
            self.published.lock().unwrap().push(r);
            Ok(())
        }

        async fn mark_failed(
            &self,
            record: &OutboxRecord,
            _error: &str,
            next_attempt_at: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), voice_agent_persistence::PersistenceError> {
            let mut r = record.clone();
            r.attempts += 1;
            if r.attempts < r.max_attempts {
                r.next_attempt_at = Some(next_attempt_at);
                self.pending.lock().unwrap().push(r);
            }
            Ok(())
        }

        async fn reap_stale_claims(&self, _lease: chrono::Duration) -> Result<u32, voice_agent_persistence::PersistenceError> {
            Ok(0)
        }

        async fn find_stale_pending(&self, _stale_after: chrono::Duration) -> Result<Vec<OutboxRecord>, voice_agent_persistence::PersistenceError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn publishes_pending_events_in_order_per_aggregate() {
        let store = Arc::new(FakeStore::default());
        let sink = Arc::new(InMemoryEventSink::default());

        for i in 0..3 {
            let record = OutboxRecord::new(
                "tenant-1",
                "cart",
                "cart-1",
                "cart.item_added",
                serde_json::json!({"seq": i}),
                None,
            );
            store.append(&record).await.unwrap();
        }

        let publisher = Publisher::new(store.clone(), sink.clone(), OutboxConfig::default());
        let outcome = publisher.run_once().await.unwrap();

        assert_eq!(outcome.published, 3);
        assert_eq!(store.published.lock().unwrap().len(), 3);
        let seqs: Vec<i64> = sink.published.lock().iter().map(|(_, _, p)| p["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
