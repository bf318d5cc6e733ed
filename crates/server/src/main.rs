//! Composition root: loads configuration, wires every C1-C12 collaborator
//! together behind a single `AppState`, and serves the WebSocket/HTTP
//! surface until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_agent_agent::Orchestrator;
use voice_agent_config::{load_settings, Settings};
use voice_agent_outbox::{AnalyticsEmitter, HttpEventSink, InMemoryEventSink, Publisher};
use voice_agent_persistence::{
    InMemoryOutboxStore, InMemoryTurnStateStore, OutboxStore, PersistenceError, ScyllaConfig,
    TurnStateStore,
};
use voice_agent_rag::{CachingRetrievalClient, HybridRetrievalClient, SparseConfig, SparseIndex, VectorDistance, VectorStore, VectorStoreConfig};
use voice_agent_security::{BudgetService, PrivacyAuditRing, SecurityGuards, TokenVerifier};
use voice_agent_server::session::SessionRegistry;
use voice_agent_server::state::AppState;
use voice_agent_tools::SiteActionDispatcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("VOICE_AGENT_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), environment = ?config.environment, "starting voice agent gateway");
    config.validate().map_err(|e| format!("invalid configuration: {e}"))?;

    let metrics_handle = voice_agent_server::init_metrics().map_err(|e| e.to_string())?;
    tracing::info!("prometheus recorder installed");

    let config = Arc::new(config);

    let (checkpoints, outbox_store): (Arc<dyn TurnStateStore>, Arc<dyn OutboxStore>) =
        if config.persistence.enabled {
            let scylla_config = ScyllaConfig {
                hosts: config.persistence.scylla_hosts.clone(),
                keyspace: config.persistence.keyspace.clone(),
                replication_factor: config.persistence.replication_factor,
            };
            match init_persistence(scylla_config).await {
                Ok(layer) => {
                    tracing::info!(hosts = ?config.persistence.scylla_hosts, keyspace = %config.persistence.keyspace, "scylla persistence initialized");
                    (Arc::new(layer.checkpoints), Arc::new(layer.outbox))
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to initialize scylla persistence, falling back to in-memory");
                    (Arc::new(InMemoryTurnStateStore::default()), Arc::new(InMemoryOutboxStore::default()))
                }
            }
        } else {
            tracing::info!("persistence disabled, using in-memory stores");
            (Arc::new(InMemoryTurnStateStore::default()), Arc::new(InMemoryOutboxStore::default()))
        };

    let hybrid = build_retrieval_client(&config).await;
    let retrieval = Arc::new(CachingRetrievalClient::new(
        Arc::new(hybrid),
        std::time::Duration::from_secs(config.retrieval.cache_ttl_secs),
    ));

    let token_verifier = Arc::new(
        TokenVerifier::new(&config.security, config.environment)
            .map_err(|e| format!("failed to initialize token verifier: {e}"))?,
    );
    let security = Arc::new(SecurityGuards::new(
        config.security.clone(),
        config.environment,
        config.server.cors_origins.clone(),
    ));
    let budget = Arc::new(BudgetService::new(config.budgets.clone()));
    let privacy_audit = Arc::new(PrivacyAuditRing::new(config.security.audit_ring_capacity));

    // No sites are registered with actions out of the box; a deployment wires
    // its own `ActionHandler`s per site at startup, grounded in its own
    // function/API catalogue. The dispatcher itself has no site-independent
    // defaults to seed.
    let dispatcher = Arc::new(SiteActionDispatcher::new());

    let analytics: Arc<AnalyticsEmitter<Arc<dyn OutboxStore>>> =
        Arc::new(AnalyticsEmitter::new(Arc::clone(&outbox_store)));

    let orchestrator: Arc<Orchestrator<Arc<dyn OutboxStore>>> = Arc::new(Orchestrator::new(
        Arc::clone(&security),
        Arc::clone(&budget),
        Arc::clone(&privacy_audit),
        Arc::clone(&retrieval),
        Arc::clone(&dispatcher),
        checkpoints,
        Arc::clone(&analytics),
        config.orchestrator.clone(),
        config.rag.final_top_k,
    ));

    let sessions = Arc::new(SessionRegistry::new());

    let state = AppState {
        config: Arc::clone(&config),
        token_verifier,
        security,
        budget,
        privacy_audit,
        orchestrator,
        analytics,
        sessions,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    spawn_outbox_publisher(Arc::clone(&outbox_store), &config, shutdown_rx);

    let app = voice_agent_server::http::create_router(state, metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!(%addr, path = %config.server.ws_path, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    tracing::info!("server shutdown complete");
    Ok(())
}

/// Builds the hybrid retrieval client, attaching a vector store only when
/// Qdrant is reachable at startup; the sparse (BM25) index is always
/// in-process so keyword search keeps working even if Qdrant is down.
async fn build_retrieval_client(config: &Settings) -> HybridRetrievalClient {
    let mut hybrid = HybridRetrievalClient::new(config.rag.clone(), config.retrieval.clone());

    let sparse_config = SparseConfig { top_k: config.rag.sparse_top_k, ..SparseConfig::default() };
    match SparseIndex::new(sparse_config) {
        Ok(index) => hybrid = hybrid.with_sparse_index(Arc::new(index)),
        Err(e) => tracing::warn!(error = %e, "failed to build sparse index, fulltext strategy disabled"),
    }

    let vs_config = VectorStoreConfig {
        endpoint: config.rag.qdrant_endpoint.clone(),
        collection: config.rag.qdrant_collection.clone(),
        vector_dim: config.rag.vector_dim,
        distance: VectorDistance::Cosine,
        api_key: config.rag.qdrant_api_key.clone(),
    };
    match VectorStore::new(vs_config).await {
        Ok(store) => {
            if let Err(e) = store.ensure_collection().await {
                tracing::warn!(error = %e, "failed to ensure qdrant collection, vector strategy disabled");
            } else {
                tracing::info!(endpoint = %config.rag.qdrant_endpoint, collection = %config.rag.qdrant_collection, "qdrant vector store ready");
                hybrid = hybrid.with_vector_store(Arc::new(store));
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to connect to qdrant, vector strategy disabled"),
    }

    hybrid
}

async fn init_persistence(
    config: ScyllaConfig,
) -> Result<voice_agent_persistence::PersistenceLayer, PersistenceError> {
    voice_agent_persistence::init(config).await
}

/// Drives C10/C11: picks a concrete `EventSink` from `VOICE_AGENT_EVENT_SINK_URL`
/// (an HTTP webhook base URL) or falls back to an in-memory sink for local
/// development, wraps it for idempotency, and runs the publisher loop until
/// shutdown.
fn spawn_outbox_publisher(
    store: Arc<dyn OutboxStore>,
    config: &Arc<Settings>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) {
    let outbox_config = config.outbox.clone();
    let sink: Arc<dyn voice_agent_outbox::EventSink> = match std::env::var("VOICE_AGENT_EVENT_SINK_URL") {
        Ok(url) => {
            tracing::info!(%url, "publishing outbox events over http");
            Arc::new(HttpEventSink::new(url))
        }
        Err(_) => {
            tracing::info!("VOICE_AGENT_EVENT_SINK_URL not set, using in-memory event sink");
            Arc::new(InMemoryEventSink::default())
        }
    };
    let idempotent_sink = Arc::new(voice_agent_outbox::IdempotentSink::new(sink));

    let publisher = Arc::new(Publisher::new(store, idempotent_sink, outbox_config.clone()));
    let poll_interval = std::time::Duration::from_millis(outbox_config.backoff_base_ms);
    tokio::spawn(async move {
        publisher.run(poll_interval, shutdown_rx).await;
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}

#[cfg(feature = "telemetry")]
fn init_tracing(config: &Settings) {
    use opentelemetry_otlp::WithExportConfig;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("voice_agent={},tower_http=debug", config.observability.log_level).into()
    });
    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    if let Some(otlp_endpoint) = &config.observability.otlp_endpoint {
        if config.observability.tracing_enabled {
            match opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(otlp_endpoint))
                .with_trace_config(opentelemetry_sdk::trace::Config::default().with_resource(
                    opentelemetry_sdk::Resource::new(vec![
                        opentelemetry::KeyValue::new("service.name", "voice-agent"),
                        opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ]),
                ))
                .install_batch(opentelemetry_sdk::runtime::Tokio)
            {
                Ok(tracer) => {
                    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
                    subscriber.with(fmt_layer).with(otel_layer).init();
                    tracing::info!(endpoint = %otlp_endpoint, "opentelemetry tracing enabled");
                    return;
                }
                Err(e) => eprintln!("failed to initialize opentelemetry: {e}. falling back to console."),
            }
        }
    }
    subscriber.with(fmt_layer).init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("voice_agent={},tower_http=debug", config.observability.log_level).into()
    });
    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
