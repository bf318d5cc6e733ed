//! C11 Event Bus Sink: a target-agnostic publish interface. The outbox
//! publisher (C10) is the only caller; it never knows whether events end up
//! on Kafka, NATS, or a plain HTTP webhook. Idempotency is layered on top of
//! any concrete sink via [`IdempotentSink`], deduplicating by `eventId`
//! regardless of what the backend itself guarantees.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashSet;
use uuid::Uuid;

/// How a sink failure should be treated by the publisher's retry loop.
#[derive(Debug, Clone)]
pub enum SinkError {
    /// Transient — the publisher should retry with backoff.
    Retriable(String),
    /// The sink has classified this as unrecoverable (e.g. the payload was
    /// rejected as malformed); the publisher should dead-letter immediately
    /// rather than burn through retries.
    Permanent(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Retriable(msg) => write!(f, "retriable: {msg}"),
            SinkError::Permanent(msg) => write!(f, "permanent: {msg}"),
        }
    }
}

impl std::error::Error for SinkError {}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<(), SinkError>;
}

/// Wraps any [`EventSink`] with in-process dedup by `eventId`: publishing
/// the same `eventId` twice is a no-op the second time. This is defense in
/// depth on top of whatever dedup the concrete backend's consumers do —
/// the spec only requires consumer-side idempotency, but skipping an
/// already-seen id here means a reaper-reclaimed row that was actually
/// published doesn't double-publish within this process's lifetime.
pub struct IdempotentSink<S: EventSink> {
    inner: S,
    seen: DashSet<Uuid>,
}

impl<S: EventSink> IdempotentSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, seen: DashSet::new() }
    }
}

#[async_trait]
impl<S: EventSink> EventSink for IdempotentSink<S> {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<(), SinkError> {
        if let Some(event_id) = headers.get("eventId").and_then(|s| Uuid::parse_str(s).ok()) {
            if !self.seen.insert(event_id) {
                tracing::debug!(%event_id, "skipping duplicate publish, already seen");
                return Ok(());
            }
        }
        self.inner.publish(topic, key, payload, headers).await
    }
}

/// HTTP webhook sink: `POST {base_url}/{topic}` with `key`/`payload`/headers.
/// A 2xx response is success; 4xx is permanent (the target rejected the
/// shape); anything else (5xx, timeout, connection refused) is retriable.
pub struct HttpEventSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<(), SinkError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), topic);
        let mut request = self.client.post(&url).json(&serde_json::json!({ "key": key, "payload": payload }));
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| SinkError::Retriable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(SinkError::Permanent(format!("sink rejected event with status {status}")))
        } else {
            Err(SinkError::Retriable(format!("sink returned status {status}")))
        }
    }
}

/// In-memory sink for tests and local development, recording every publish.
#[derive(Default)]
pub struct InMemoryEventSink {
    pub published: parking_lot::Mutex<Vec<(String, String, serde_json::Value)>>,
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
        _headers: &HashMap<String, String>,
    ) -> Result<(), SinkError> {
        self.published.lock().push((topic.to_string(), key.to_string(), payload.clone()));
        Ok(())
    }
}

/// Lets the composition root pick a concrete sink at startup and hand the
/// publisher a type-erased handle, the same trick used for `OutboxStore` in
/// `voice-agent-persistence`.
#[async_trait]
impl EventSink for std::sync::Arc<dyn EventSink> {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<(), SinkError> {
        (**self).publish(topic, key, payload, headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idempotent_sink_skips_repeat_event_id() {
        let sink = IdempotentSink::new(InMemoryEventSink::default());
        let id = Uuid::new_v4().to_string();
        let mut headers = HashMap::new();
        headers.insert("eventId".to_string(), id.clone());

        sink.publish("cart", "cart-1", &serde_json::json!({}), &headers).await.unwrap();
        sink.publish("cart", "cart-1", &serde_json::json!({}), &headers).await.unwrap();

        assert_eq!(sink.inner.published.lock().len(), 1);
    }
}
