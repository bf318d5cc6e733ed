//! Voice gateway (C4): the WebSocket/HTTP surface that authenticates a
//! connection (C1), frames incoming audio (C2), brokers it to a realtime
//! provider (C3), and drives the universal agent orchestrator (C7) on every
//! finished utterance or text turn.

pub mod codec;
pub mod http;
pub mod metrics;
pub mod session;
pub mod state;
pub mod websocket;

pub use metrics::{init_metrics, metrics_handler};
pub use state::AppState;

use axum::extract::ws::CloseFrame;
use thiserror::Error;

/// Errors surfaced at the gateway boundary, each mapped both to an HTTP
/// status (for the handful of plain HTTP routes) and a WebSocket close code
/// (for everything that happens after a successful upgrade).
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("websocket protocol error: {0}")]
    WebSocket(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Auth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::RateLimit => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Persistence(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ServerError {
    /// The WS close code/reason pair to send before dropping the connection.
    /// Reason strings match the wire protocol's documented error codes.
    pub fn as_close_frame(&self) -> CloseFrame<'static> {
        let (code, reason) = match self {
            ServerError::Auth(_) => (1008, "AUTH_FAILED"),
            ServerError::RateLimit => (1008, "RATE_LIMITED"),
            ServerError::InvalidRequest(_) => (1003, "INVALID_REQUEST"),
            ServerError::Session(_) => (1011, "SESSION_ERROR"),
            ServerError::WebSocket(_) => (1011, "PROTOCOL_ERROR"),
            ServerError::Internal(_) => (1011, "INTERNAL_ERROR"),
            ServerError::Persistence(_) => (1011, "PERSISTENCE_ERROR"),
        };
        CloseFrame { code, reason: reason.into() }
    }
}
