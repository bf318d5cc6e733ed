//! Error taxonomy for the universal agent orchestrator (C7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("security check failed: {0}")]
    SecurityDenied(String),

    #[error(transparent)]
    Security(#[from] voice_agent_security::SecurityError),

    #[error("retrieval error: {0}")]
    Retrieval(#[from] voice_agent_rag::RagError),

    #[error("action dispatch error: {0}")]
    Dispatch(#[from] voice_agent_tools::ActionError),

    #[error("persistence error: {0}")]
    Persistence(#[from] voice_agent_persistence::PersistenceError),

    #[error("outbox error: {0}")]
    Outbox(#[from] voice_agent_outbox::OutboxError),

    #[error("turn deadline of {0}ms exceeded at node '{1}'")]
    DeadlineExceeded(u64, &'static str),

    #[error("no active turn state for session '{0}'")]
    NoActiveTurn(String),

    #[error("tool loop budget exhausted after {0} cycles")]
    ToolLoopExhausted(u32),
}

pub type Result<T> = std::result::Result<T, AgentError>;
