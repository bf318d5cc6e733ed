//! Plain HTTP surface: the WS upgrade route, health/readiness, and metrics.
//! Everything turn-bearing lives behind the WebSocket in `websocket.rs` — no
//! REST endpoints exist for turns, sessions, or actions, per the gateway's
//! voice-first scope.

use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use voice_agent_persistence::OutboxStore;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::ws_handler;

/// Builds the full router: WS upgrade, health/readiness, and `/metrics`
/// mounted under its own state since it doesn't need the rest of `AppState`.
pub fn create_router<S: OutboxStore + 'static>(state: AppState<S>, metrics_handle: PrometheusHandle) -> Router {
    let cors_layer = build_cors_layer(&state.config.server.cors_origins, state.config.server.cors_enabled);
    let ws_path = state.config.server.ws_path.clone();
    let metrics_enabled = state.config.observability.metrics_enabled;

    let app = Router::new()
        .route(&ws_path, get(ws_handler::<S>))
        .route("/health", get(health_check::<S>))
        .route("/ready", get(readiness_check::<S>))
        .with_state(state);

    let app = if metrics_enabled {
        let metrics_router = Router::new().route("/metrics", get(metrics_handler)).with_state(metrics_handle);
        app.merge(metrics_router)
    } else {
        app
    };

    app.layer(cors_layer).layer(CompressionLayer::new()).layer(TraceLayer::new_for_http())
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        return CorsLayer::new();
    }
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST]);
    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(parsed)
    }
}

/// Liveness: the process is up and answering HTTP. Does not touch any
/// dependency, so it stays green through a ScyllaDB or Qdrant outage.
async fn health_check<S: OutboxStore>(
    axum::extract::State(state): axum::extract::State<AppState<S>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeSessions": state.sessions.len(),
    }))
}

/// Readiness: reports the gateway's dependency picture so an orchestrator
/// (k8s or otherwise) can gate traffic. Always `ready=true` at the HTTP
/// layer — retrieval/provider degradation is a per-turn concern surfaced in
/// `error` events, not a reason to pull the whole gateway from rotation.
async fn readiness_check<S: OutboxStore>(
    axum::extract::State(state): axum::extract::State<AppState<S>>,
) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "ready": true,
            "environment": format!("{:?}", state.config.environment),
            "activeSessions": state.sessions.len(),
        })),
    )
}
