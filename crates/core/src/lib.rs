//! Core data types shared across the voice agent runtime.
//!
//! This crate has no internal workspace dependencies — every other crate
//! depends on it, so it stays free of anything that would create a cycle:
//! audio frames, the turn/session/slot/action data model, and the shared
//! taxonomies (PII, rate limits, budgets, audit) that security, persistence
//! and outbox all need to agree on.

pub mod action;
pub mod audio;
pub mod audit;
pub mod budget;
pub mod error;
pub mod outbox_record;
pub mod pii;
pub mod rate_limit;
pub mod session;
pub mod slot;
pub mod turn;
pub mod turn_state;

pub use action::{ActionPlanItem, ActionType, RiskLevel, SideEffecting, ToolResult};
pub use audio::{AudioEncoding, AudioFrame, Channels, SampleRate};
pub use audit::{Actor, AuditEntry, AuditOutcome, PrivacyAuditEntry};
pub use budget::{BudgetLedgerRow, ResourceType};
pub use error::{Error, Result};
pub use outbox_record::{OutboxRecord, OutboxStatus};
pub use pii::{PIIEntity, PIISeverity, PIIType};
pub use rate_limit::RateLimitBucket;
pub use session::{SessionAuth, SessionState, VoiceSession};
pub use slot::{Constraint, Intent, SlotFrame, SlotSource, SlotValue};
pub use turn::{Turn, TurnRole};
pub use turn_state::{ErrorRecoveryStrategy, ResourceUsage, RetrievedItem, TurnError, TurnOutcome, TurnState};
