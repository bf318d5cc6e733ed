//! ScyllaDB persistence layer.
//!
//! Provides durable storage for the three things the runtime cannot afford
//! to lose on a process restart: orchestrator turn checkpoints, the
//! transactional outbox, and the compliance audit log. Session registry
//! state (C4's `VoiceSession`) is deliberately NOT here — it's in-memory,
//! owned exclusively by the gateway, and gone on disconnect by design.

pub mod audit;
pub mod checkpoint;
pub mod client;
pub mod error;
pub mod outbox;
pub mod schema;

pub use audit::{AuditLog, ScyllaAuditLog};
pub use checkpoint::{InMemoryTurnStateStore, ScyllaTurnStateStore, TurnStateStore};
pub use client::{ScyllaClient, ScyllaConfig};
pub use error::PersistenceError;
pub use outbox::{InMemoryOutboxStore, OutboxStore, ScyllaOutboxStore};

/// Connects to ScyllaDB, ensures the schema, and wires up every store.
pub async fn init(config: ScyllaConfig) -> Result<PersistenceLayer, PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;

    Ok(PersistenceLayer {
        checkpoints: ScyllaTurnStateStore::new(client.clone()),
        outbox: ScyllaOutboxStore::new(client.clone()),
        audit: ScyllaAuditLog::new(client),
    })
}

/// Combined persistence layer wired at the composition root
pub struct PersistenceLayer {
    pub checkpoints: ScyllaTurnStateStore,
    pub outbox: ScyllaOutboxStore,
    pub audit: ScyllaAuditLog,
}
