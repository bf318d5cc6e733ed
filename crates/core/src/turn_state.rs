//! `TurnState`: the checkpointed state the universal agent orchestrator (C7)
//! reads and writes as it walks a turn through its node graph. Owned
//! exclusively by the orchestrator and checkpointed to durable storage keyed
//! by `sessionId` — see `checkpointed per sessionId` in the component design.

use crate::action::{ActionPlanItem, ToolResult};
use crate::slot::SlotFrame;
use crate::turn::Turn;
use serde::{Deserialize, Serialize};

/// A single item returned by the hybrid retrieval client (C5)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub id: String,
    pub content: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub score: f32,
    /// Truncated to <= 200 chars by the retrieval client
    pub relevant_snippet: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Token/action budget consumption tracked for this turn, mirrored against C9
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceUsage {
    pub tokens_reserved: u64,
    pub tokens_committed: u64,
    pub actions_reserved: u64,
    pub actions_committed: u64,
}

/// Error recovery strategies `handleError` may select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRecoveryStrategy {
    Retry,
    RelaxConstraints,
    SwitchProvider,
    AskForHelp,
}

/// A turn-scoped error; cleared by `handleError` iff a retry strategy is chosen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnError {
    pub code: String,
    pub message: String,
}

/// The checkpointed state a turn carries through the orchestrator's node graph
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TurnState {
    pub session_id: String,
    pub turn_id: String,
    #[serde(default)]
    pub messages: Vec<Turn>,
    pub user_input: String,
    /// Preserved for audit only; never emitted outward once `validatePrivacy` redacts `userInput`
    pub original_input: String,
    #[serde(default)]
    pub detected_language: Option<String>,
    #[serde(default)]
    pub slot_frame: Option<SlotFrame>,
    #[serde(default)]
    pub search_results: Vec<RetrievedItem>,
    #[serde(default)]
    pub action_plan: Vec<ActionPlanItem>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub needs_confirmation: bool,
    #[serde(default)]
    pub confirmation_received: bool,
    #[serde(default)]
    pub error: Option<TurnError>,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
    #[serde(default)]
    pub error_recovery_attempted: bool,
    #[serde(default)]
    pub error_recovery_strategy: Option<ErrorRecoveryStrategy>,
    /// Number of completed `planFunctions -> observeResults` cycles this turn; capped at 3
    #[serde(default)]
    pub tool_loop_count: u32,
    /// Set by `validateSecurity` when the guard verdict's risk level was
    /// `high`; read back by `planFunctions` to elevate low-risk plan items.
    #[serde(default)]
    pub security_risk_high: bool,
    /// Results from `executeSpeculative`'s shadow buffer, checkpointed
    /// alongside an `AskConfirmation` outcome so the confirmation-received
    /// resume can reuse them instead of re-running the same side-effect-free
    /// actions. Discarded (never populated here) whenever the plan is
    /// replanned, since a replanned turn no longer matches the speculative
    /// guess.
    #[serde(default)]
    pub speculative_results: Vec<ToolResult>,
}

impl TurnState {
    pub fn new(session_id: impl Into<String>, turn_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        let user_input = user_input.into();
        Self {
            session_id: session_id.into(),
            turn_id: turn_id.into(),
            original_input: user_input.clone(),
            user_input,
            ..Default::default()
        }
    }

    pub fn has_unrecovered_error(&self) -> bool {
        self.error.is_some() && !self.error_recovery_attempted
    }
}

/// What a turn produced, handed back to the voice gateway (C4). Resolves the
/// open question of whether `streamConversation` is a resume point: it is
/// not — a turn is always one of these three terminal shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    AskClarification {
        question: String,
        suggested_values: Vec<String>,
    },
    AskConfirmation {
        prompt: String,
        plan: Vec<ActionPlanItem>,
    },
    Final {
        text: String,
        citations: Vec<RetrievedItem>,
        ui_hints: serde_json::Value,
        clarification_rounds: u32,
        tools_executed: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_turn_state_keeps_original_input_for_audit() {
        let state = TurnState::new("sess-1", "turn-1", "john@acme.com needs help");
        assert_eq!(state.original_input, state.user_input);
    }

    #[test]
    fn unrecovered_error_requires_both_conditions() {
        let mut state = TurnState::new("sess-1", "turn-1", "hi");
        assert!(!state.has_unrecovered_error());
        state.error = Some(TurnError { code: "X".into(), message: "y".into() });
        assert!(state.has_unrecovered_error());
        state.error_recovery_attempted = true;
        assert!(!state.has_unrecovered_error());
    }
}
