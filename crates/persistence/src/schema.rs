//! ScyllaDB schema creation.
//!
//! Three denormalized outbox tables mirror the logical indexes named in the
//! external-interfaces section of the spec: `(status, created_at)` for the
//! publisher's poll loop, `(aggregate, aggregate_id)` for per-aggregate
//! ordering checks, and `(correlation_id)` for tracing a turn's events. All
//! three are written from a single `OutboxStore::append` call.

use scylla::Session;

use crate::error::PersistenceError;

pub async fn create_keyspace(session: &Session, keyspace: &str, replication_factor: u8) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {replication_factor}}}"
    );
    session.query_unpaged(query, &[]).await?;
    Ok(())
}

pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    let turn_checkpoints = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {keyspace}.turn_state_checkpoints (
            session_id TEXT,
            turn_id TEXT,
            state_json TEXT,
            updated_at TIMESTAMP,
            PRIMARY KEY (session_id)
        ) WITH default_time_to_live = 86400
        "#
    );
    session.query_unpaged(turn_checkpoints, &[]).await?;

    let outbox_events = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {keyspace}.outbox_events (
            status TEXT,
            created_at TIMESTAMP,
            id UUID,
            tenant_id TEXT,
            aggregate TEXT,
            aggregate_id TEXT,
            type TEXT,
            payload_json TEXT,
            correlation_id TEXT,
            published_at TIMESTAMP,
            attempts INT,
            max_attempts INT,
            last_attempt_at TIMESTAMP,
            next_attempt_at TIMESTAMP,
            error TEXT,
            PRIMARY KEY ((status), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at ASC, id ASC)
        "#
    );
    session.query_unpaged(outbox_events, &[]).await?;

    let outbox_by_aggregate = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {keyspace}.outbox_by_aggregate (
            aggregate TEXT,
            aggregate_id TEXT,
            created_at TIMESTAMP,
            id UUID,
            tenant_id TEXT,
            type TEXT,
            payload_json TEXT,
            status TEXT,
            PRIMARY KEY ((aggregate, aggregate_id), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at ASC, id ASC)
        "#
    );
    session.query_unpaged(outbox_by_aggregate, &[]).await?;

    let outbox_by_correlation = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {keyspace}.outbox_by_correlation (
            correlation_id TEXT,
            created_at TIMESTAMP,
            id UUID,
            tenant_id TEXT,
            aggregate TEXT,
            aggregate_id TEXT,
            type TEXT,
            status TEXT,
            PRIMARY KEY ((correlation_id), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at ASC, id ASC)
        "#
    );
    session.query_unpaged(outbox_by_correlation, &[]).await?;

    let audit_log = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {keyspace}.audit_log (
            partition_date TEXT,
            session_id TEXT,
            timestamp BIGINT,
            id UUID,
            event_type TEXT,
            actor_type TEXT,
            actor_id TEXT,
            resource_type TEXT,
            resource_id TEXT,
            action TEXT,
            outcome TEXT,
            details_json TEXT,
            previous_hash TEXT,
            hash TEXT,
            PRIMARY KEY ((partition_date, session_id), timestamp, id)
        ) WITH CLUSTERING ORDER BY (timestamp DESC, id DESC)
        AND default_time_to_live = 220752000
        "#
    );
    session.query_unpaged(audit_log, &[]).await?;

    tracing::info!("persistence schema ensured");
    Ok(())
}
