//! Universal Agent Orchestrator (C7)
//!
//! Drives the checkpointed turn state machine: security and privacy gates,
//! budget reservation, intent/slot understanding, hybrid retrieval, action
//! planning and dispatch, and finalization — resumable across clarification
//! and confirmation round-trips via `TurnStateStore`.

pub mod error;
pub mod orchestrator;
pub mod planning;
pub mod slots;

pub use error::{AgentError, Result};
pub use orchestrator::{Orchestrator, TurnContext, TurnInput, POLICY_ERROR_CODES};
pub use slots::{hemisphere_for_locale, GeoPoint, Hemisphere, SlotExtractor};
