//! Shared action/tool types used by both the orchestrator (agent crate) and the
//! per-site action registry (tools crate). Kept in core so neither crate has to
//! depend on the other just to talk about an action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an action is surfaced on the tenant's site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Navigation,
    Form,
    Button,
    Api,
    Custom,
}

/// Side-effect class of an action; gates the confirmation requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffecting {
    Safe,
    Read,
    Write,
    Destructive,
}

/// Risk classification used by both security guards and the orchestrator's planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One step of an orchestrator-produced plan, consumed by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlanItem {
    pub action_name: String,
    pub parameters: serde_json::Value,
    pub reasoning: String,
    pub risk_level: RiskLevel,
    pub priority: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// If true, a failure of this item aborts the remaining batch
    #[serde(default)]
    pub critical: bool,
}

impl ActionPlanItem {
    /// Action names eligible for speculative (pre-confirmation) execution per the
    /// orchestrator's `executeSpeculative` node
    pub fn is_speculative_eligible(&self, confidence: f32) -> bool {
        const SPECULATIVE_PREFIXES: &[&str] = &[
            "navigate_", "search_", "filter_", "sort_", "view_", "preview_", "load_",
        ];
        confidence >= 0.6 && SPECULATIVE_PREFIXES.iter().any(|p| self.action_name.starts_with(p))
    }
}

/// Result of executing (or dry-running) an action, folded into `TurnState::toolResults`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub side_effects: Vec<String>,
}

impl ToolResult {
    pub fn is_transactional_success(&self) -> bool {
        if !self.success {
            return false;
        }
        const TRANSACTIONAL: &[&str] = &["purchase", "book", "add_to_cart", "checkout"];
        TRANSACTIONAL.iter().any(|t| self.tool_name.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speculative_eligibility_requires_prefix_and_confidence() {
        let item = ActionPlanItem {
            action_name: "search_events".into(),
            parameters: serde_json::json!({}),
            reasoning: String::new(),
            risk_level: RiskLevel::Low,
            priority: 0,
            depends_on: vec![],
            critical: false,
        };
        assert!(item.is_speculative_eligible(0.6));
        assert!(!item.is_speculative_eligible(0.59));

        let write_item = ActionPlanItem {
            action_name: "add_to_cart".into(),
            ..item
        };
        assert!(!write_item.is_speculative_eligible(0.99));
    }
}
