use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("persistence error: {0}")]
    Persistence(#[from] voice_agent_persistence::PersistenceError),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("event dead-lettered: {0}")]
    DeadLettered(String),
}

pub type Result<T> = std::result::Result<T, OutboxError>;
