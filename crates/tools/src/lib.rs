//! Function/Action Dispatcher (C8): validates and executes per-site
//! registered actions, computing side-effect class, dry-run results, and
//! retaining execution history.

pub mod action_registry;
pub mod error;

pub use action_registry::{
    ActionCall, ActionDefinition, ActionHandler, ActionOutcome, ActionRegistry, DryRunResult,
    ExecuteRequest, ExecuteResult, ParameterSpec, SiteActionDispatcher,
};
pub use error::ActionError;
