//! Realtime Provider Adapter (C3): brokers an external realtime
//! speech/conversation model behind one bidirectional-channel trait.

pub mod error;
pub mod provider;

pub use error::LlmError;
pub use provider::{
    AgentDelta, FunctionCall, FunctionCallComplete, MockRealtimeProvider, ProviderEvent,
    ReconnectingProvider, RealtimeProvider, Transcription, TranscriptionKind,
    MAX_RECONNECT_ATTEMPTS, RECONNECT_BACKOFFS_MS,
};
