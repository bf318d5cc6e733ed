use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("action timed out after {0}s")]
    Timeout(u64),

    #[error("action execution failed: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, ActionError>;
