//! Transactional outbox publisher (C10), event bus sink (C11), and analytics
//! emitter (C12). Every component downstream of the database talks to
//! `voice_agent_persistence::OutboxStore` only through this crate.

pub mod analytics;
pub mod error;
pub mod publisher;
pub mod sink;

pub use analytics::AnalyticsEmitter;
pub use error::OutboxError;
pub use publisher::{PollOutcome, Publisher};
pub use sink::{EventSink, HttpEventSink, IdempotentSink, InMemoryEventSink, SinkError};
