//! Prometheus wiring for the runtime-wide counters/histograms every crate
//! records through the `metrics` facade (`voice-agent-outbox`'s analytics
//! and publisher modules, the gateway's own heartbeat/backpressure counters
//! below). One recorder is installed process-wide at startup; `/metrics`
//! just renders its current snapshot.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder. Must run once, before any
/// `metrics::counter!`/`histogram!` call anywhere in the process.
pub fn init_metrics() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("failed to install Prometheus recorder: {e}"))
}

/// `GET /metrics` handler, registered only when `observability.metrics_enabled`.
pub async fn metrics_handler(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> Response {
    (StatusCode::OK, handle.render()).into_response()
}

pub fn record_ws_connection_opened() {
    metrics::counter!("ws_connections_opened_total").increment(1);
}

pub fn record_ws_connection_closed(reason: &'static str) {
    metrics::counter!("ws_connections_closed_total", "reason" => reason).increment(1);
}

pub fn record_frame_dropped(stage: &'static str) {
    metrics::counter!("audio_frames_dropped_total", "stage" => stage).increment(1);
}

pub fn record_auth_failure() {
    metrics::counter!("ws_auth_failures_total").increment(1);
}

pub fn record_first_audio_token_latency_ms(ms: f64) {
    metrics::histogram!("first_audio_token_latency_ms").record(ms);
}
