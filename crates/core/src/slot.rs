//! Slot understanding types produced by the orchestrator's `understandIntent` node

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Intents the universal agent orchestrator recognizes across tenant sites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BuyTickets,
    BookService,
    FindProducts,
    GetInformation,
    Navigation,
}

impl Intent {
    /// Critical slots for this intent, in clarification priority order.
    /// See `checkClarification` in the orchestrator design.
    pub fn critical_slots(&self) -> &'static [&'static str] {
        match self {
            Intent::BuyTickets => &["time", "quantity", "location", "genre"],
            Intent::FindProducts => &["category", "location", "price"],
            Intent::BookService => &["service_type", "time", "location"],
            Intent::GetInformation | Intent::Navigation => &[],
        }
    }
}

/// Where a slot's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSource {
    UserInput,
    Context,
    Inference,
    Default,
}

/// A single slot's raw and normalized value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotValue {
    /// The raw text span the value was extracted from
    pub raw: String,
    /// Normalized form, e.g. a resolved date range or canonical category
    pub normalized: serde_json::Value,
    pub confidence: f32,
    pub source: SlotSource,
    #[serde(default)]
    pub needs_confirmation: bool,
}

impl SlotValue {
    pub fn new(raw: impl Into<String>, normalized: serde_json::Value, confidence: f32, source: SlotSource) -> Self {
        Self {
            raw: raw.into(),
            normalized,
            confidence,
            source,
            needs_confirmation: false,
        }
    }
}

/// A constraint the user expressed that narrows a search or action, e.g. `{field: "genre", op: "eq", value: "electronic"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub field: String,
    pub op: String,
    pub value: serde_json::Value,
}

/// Output of `understandIntent`: the detected intent plus normalized slots
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlotFrame {
    pub intent: Option<Intent>,
    pub confidence: f32,
    #[serde(default)]
    pub slots: HashMap<String, SlotValue>,
    #[serde(default)]
    pub missing_slots: Vec<String>,
    #[serde(default)]
    pub resolved_slots: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl SlotFrame {
    pub fn new(intent: Intent, confidence: f32) -> Self {
        Self {
            intent: Some(intent),
            confidence,
            ..Default::default()
        }
    }

    /// `resolvedSlots ∩ missingSlots = ∅`
    pub fn is_consistent(&self) -> bool {
        !self
            .resolved_slots
            .iter()
            .any(|s| self.missing_slots.contains(s))
    }

    /// Critical slots for the detected intent that are neither resolved nor missing yet
    pub fn unaccounted_critical_slots(&self) -> Vec<&'static str> {
        let Some(intent) = self.intent else {
            return Vec::new();
        };
        intent
            .critical_slots()
            .iter()
            .copied()
            .filter(|s| !self.resolved_slots.iter().any(|r| r == s) && !self.missing_slots.iter().any(|m| m == s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_slot_order_matches_intent() {
        assert_eq!(
            Intent::BuyTickets.critical_slots(),
            &["time", "quantity", "location", "genre"]
        );
    }

    #[test]
    fn consistency_invariant_catches_overlap() {
        let mut frame = SlotFrame::new(Intent::FindProducts, 0.9);
        frame.resolved_slots.push("category".into());
        frame.missing_slots.push("category".into());
        assert!(!frame.is_consistent());
    }
}
