//! C12 Analytics Emitter: every event is written through the outbox path
//! (`aggregate = "analytics"`) rather than directly to a sink, so analytics
//! delivery gets the same at-least-once/ordering guarantees as domain
//! events. `metrics` counters/histograms are layered on top for live
//! dashboards, not as a substitute for the durable path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use voice_agent_core::OutboxRecord;
use voice_agent_persistence::OutboxStore;

pub struct AnalyticsEmitter<S: OutboxStore> {
    store: Arc<S>,
}

impl<S: OutboxStore> AnalyticsEmitter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Emitted once per completed turn.
    #[allow(clippy::too_many_arguments)]
    pub async fn turn_completed(
        &self,
        tenant_id: &str,
        session_id: &str,
        turn_id: &str,
        intent: &str,
        slot_count: usize,
        needed_clarification: bool,
        needed_confirmation: bool,
        tool_count: usize,
        search_count: usize,
        turn_duration: Duration,
    ) -> crate::error::Result<()> {
        let payload = json!({
            "sessionId": session_id,
            "turnId": turn_id,
            "intent": intent,
            "slotCount": slot_count,
            "neededClarification": needed_clarification,
            "neededConfirmation": needed_confirmation,
            "toolCount": tool_count,
            "searchCount": search_count,
            "durationMs": turn_duration.as_millis() as u64,
        });
        self.emit(tenant_id, session_id, "universal_agent_completed", payload).await?;

        metrics::histogram!("turn_duration_ms").record(turn_duration.as_millis() as f64);
        metrics::counter!("turns_completed_total").increment(1);
        if needed_clarification {
            metrics::counter!("turns_needed_clarification_total").increment(1);
        }
        if needed_confirmation {
            metrics::counter!("turns_needed_confirmation_total").increment(1);
        }
        Ok(())
    }

    pub async fn tool_executed(
        &self,
        tenant_id: &str,
        session_id: &str,
        tool_name: &str,
        success: bool,
        duration: Duration,
    ) -> crate::error::Result<()> {
        let payload = json!({
            "sessionId": session_id,
            "tool": tool_name,
            "success": success,
            "durationMs": duration.as_millis() as u64,
        });
        self.emit(tenant_id, session_id, "ai.tool_executed", payload).await?;

        metrics::counter!("tool_executions_total", "tool" => tool_name.to_string()).increment(1);
        metrics::histogram!("tool_duration_ms", "tool" => tool_name.to_string()).record(duration.as_millis() as f64);
        if !success {
            metrics::counter!("tool_failures_total", "tool" => tool_name.to_string()).increment(1);
        }
        Ok(())
    }

    pub async fn hybrid_search_executed(
        &self,
        tenant_id: &str,
        session_id: &str,
        query: &str,
        result_count: usize,
        sources_consulted: usize,
        duration: Duration,
        timed_out: bool,
    ) -> crate::error::Result<()> {
        let payload = json!({
            "sessionId": session_id,
            "query": query,
            "resultCount": result_count,
            "sourcesConsulted": sources_consulted,
            "durationMs": duration.as_millis() as u64,
            "timedOut": timed_out,
        });
        self.emit(tenant_id, session_id, "search.hybrid_executed", payload).await?;

        metrics::counter!("hybrid_searches_total").increment(1);
        metrics::histogram!("hybrid_search_duration_ms").record(duration.as_millis() as f64);
        if timed_out {
            metrics::counter!("hybrid_search_timeouts_total").increment(1);
        }
        Ok(())
    }

    async fn emit(
        &self,
        tenant_id: &str,
        aggregate_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> crate::error::Result<()> {
        let record = OutboxRecord::new(tenant_id, "analytics", aggregate_id, event_type, payload, None);
        self.store.append(&record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        appended: Mutex<Vec<OutboxRecord>>,
    }

    #[async_trait::async_trait]
    impl OutboxStore for RecordingStore {
        async fn append(&self, record: &OutboxRecord) -> Result<(), voice_agent_persistence::PersistenceError> {
            self.appended.lock().unwrap().push(record.clone());
            Ok(())
        }
        async fn claim_batch(&self, _batch_size: u32) -> Result<Vec<OutboxRecord>, voice_agent_persistence::PersistenceError> {
            Ok(Vec::new())
        }
        async fn mark_published(&self, _record: &OutboxRecord) -> Result<(), voice_agent_persistence::PersistenceError> {
            Ok(())
        }
        async fn mark_failed(
            &self,
            _record: &OutboxRecord,
            _error: &str,
            _next_attempt_at: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), voice_agent_persistence::PersistenceError> {
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
    async fn turn_completed_writes_through_outbox_not_directly_to_a_sink() {
        let store = Arc::new(RecordingStore::default());
        let emitter = AnalyticsEmitter::new(store.clone());

        emitter
            .turn_completed("tenant-1", "session-1", "turn-1", "book_appointment", 3, false, true, 1, 2, Duration::from_millis(420))
            .await
            .unwrap();

        let appended = store.appended.lock().unwrap();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].aggregate, "analytics");
        assert_eq!(appended[0].event_type, "universal_agent_completed");
        assert_eq!(appended[0].payload["intent"], "book_appointment");
    }
}
