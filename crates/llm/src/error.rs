use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider unavailable after reconnect attempts exhausted: {0}")]
    ProviderUnavailable(String),

    #[error("session not connected")]
    NotConnected,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LlmError {
    /// Stable error code surfaced to C4/C7 in a `ProviderEvent::Error`.
    pub fn code(&self) -> &'static str {
        match self {
            LlmError::Transport(_) => "TRANSPORT_ERROR",
            LlmError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            LlmError::NotConnected => "NOT_CONNECTED",
            LlmError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
