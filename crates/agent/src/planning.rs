//! `planFunctions`: turns a resolved `SlotFrame` into an ordered action plan,
//! then consults the site's registered action definitions to decide which
//! items require confirmation and whether any risk level needs elevating.

use voice_agent_core::action::{ActionPlanItem, RiskLevel};
use voice_agent_core::slot::{Intent, SlotFrame};
use voice_agent_core::turn_state::RetrievedItem;
use voice_agent_tools::ActionRegistry;

/// Builds the intent-specific candidate plan. Action names follow the
/// `verb_noun` convention the dispatcher's per-site registry expects
/// (`search_*`, `navigate_*`, `book_*`, ...); a site that hasn't registered a
/// given name simply fails that step's `execute` with `NOT_FOUND`, which
/// `executeFunctions` treats like any other non-critical failure unless the
/// item is marked `critical`.
pub fn build_candidates(frame: &SlotFrame, search_results: &[RetrievedItem]) -> Vec<ActionPlanItem> {
    let Some(intent) = frame.intent else { return Vec::new() };

    let query = plan_query(frame, search_results);

    match intent {
        Intent::BuyTickets => vec![
            search_item("search_events", &query, 0, vec![]),
            ActionPlanItem {
                action_name: "purchase_tickets".to_string(),
                parameters: slot_parameters(frame),
                reasoning: "user expressed intent to buy tickets with enough slots resolved".to_string(),
                risk_level: RiskLevel::Medium,
                priority: 1,
                depends_on: vec!["search_events".to_string()],
                critical: true,
            },
        ],
        Intent::BookService => vec![
            search_item("search_availability", &query, 0, vec![]),
            ActionPlanItem {
                action_name: "book_appointment".to_string(),
                parameters: slot_parameters(frame),
                reasoning: "user expressed intent to book a service with enough slots resolved".to_string(),
                risk_level: RiskLevel::Medium,
                priority: 1,
                depends_on: vec!["search_availability".to_string()],
                critical: true,
            },
        ],
        Intent::FindProducts => vec![search_item("search_products", &query, 0, vec![])],
        Intent::GetInformation => Vec::new(),
        Intent::Navigation => vec![ActionPlanItem {
            action_name: "navigate_page".to_string(),
            parameters: slot_parameters(frame),
            reasoning: "user asked to go to a specific page".to_string(),
            risk_level: RiskLevel::Low,
            priority: 0,
            depends_on: vec![],
            critical: false,
        }],
    }
}

fn search_item(name: &str, query: &str, priority: u32, depends_on: Vec<String>) -> ActionPlanItem {
    ActionPlanItem {
        action_name: name.to_string(),
        parameters: serde_json::json!({ "query": query }),
        reasoning: "speculative lookup to surface options before any commitment".to_string(),
        risk_level: RiskLevel::Low,
        priority,
        depends_on,
        critical: false,
    }
}

fn plan_query(frame: &SlotFrame, search_results: &[RetrievedItem]) -> String {
    let mut parts: Vec<String> = frame.slots.values().map(|v| v.raw.clone()).collect();
    if let Some(top) = search_results.first() {
        parts.push(top.title.clone().unwrap_or_default());
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

fn slot_parameters(frame: &SlotFrame) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> =
        frame.slots.iter().map(|(name, value)| (name.clone(), value.normalized.clone())).collect();
    serde_json::Value::Object(map)
}

/// Consults the site registry for each candidate's declared `confirmation`/
/// `riskLevel`, elevating `low -> medium` when the turn's security risk came
/// back `high` (the orchestrator's discretionary escalation, not a fixed
/// rule — see `DESIGN.md`). Returns the adjusted plan plus whether any item
/// now requires confirmation before dispatch.
pub fn apply_site_policy(
    mut plan: Vec<ActionPlanItem>,
    registry: Option<&ActionRegistry>,
    security_risk_high: bool,
) -> (Vec<ActionPlanItem>, bool) {
    let mut needs_confirmation = false;

    for item in &mut plan {
        let Some(registry) = registry else { continue };
        let Some(definition) = registry.get_definition(&item.action_name) else { continue };

        if definition.risk_level > item.risk_level {
            item.risk_level = definition.risk_level;
        }
        if security_risk_high && item.risk_level == RiskLevel::Low {
            item.risk_level = RiskLevel::Medium;
        }
        if definition.confirmation || item.risk_level == RiskLevel::High {
            needs_confirmation = true;
        }
    }

    (plan, needs_confirmation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_agent_core::slot::{SlotSource, SlotValue};
    use voice_agent_tools::ActionHandler;
    use std::sync::Arc;

    struct NoopHandler;
    #[async_trait::async_trait]
    impl ActionHandler for NoopHandler {
        async fn invoke(&self, parameters: &serde_json::Value) -> voice_agent_tools::error::Result<voice_agent_tools::ActionOutcome> {
            Ok(voice_agent_tools::ActionOutcome { result: Some(parameters.clone()), side_effects: Vec::new() })
        }
    }

    fn registry_with(name: &str, confirmation: bool, risk: RiskLevel) -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register(
            voice_agent_tools::ActionDefinition {
                name: name.to_string(),
                action_type: voice_agent_core::action::ActionType::Api,
                description: String::new(),
                parameters: vec![],
                selector: None,
                confirmation,
                side_effecting: voice_agent_core::action::SideEffecting::Write,
                risk_level: risk,
                category: "test".to_string(),
                timeout_secs: 5,
            },
            Arc::new(NoopHandler),
        );
        registry
    }

    #[test]
    fn buy_tickets_produces_a_dependent_two_step_plan() {
        let mut frame = SlotFrame::new(Intent::BuyTickets, 0.9);
        frame.slots.insert("time".into(), SlotValue::new("tonight", serde_json::json!({}), 0.9, SlotSource::UserInput));
        let plan = build_candidates(&frame, &[]);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].depends_on, vec!["search_events".to_string()]);
        assert!(plan[1].critical);
    }

    #[test]
    fn get_information_has_no_side_effecting_actions() {
        let frame = SlotFrame::new(Intent::GetInformation, 0.9);
        assert!(build_candidates(&frame, &[]).is_empty());
    }

    #[test]
    fn registered_confirmation_requirement_propagates() {
        let frame = SlotFrame::new(Intent::BuyTickets, 0.9);
        let plan = build_candidates(&frame, &[]);
        let registry = registry_with("purchase_tickets", true, RiskLevel::Low);
        let (_, needs_confirmation) = apply_site_policy(plan, Some(&registry), false);
        assert!(needs_confirmation);
    }

    #[test]
    fn high_security_risk_elevates_low_risk_items() {
        let frame = SlotFrame::new(Intent::Navigation, 0.9);
        let plan = build_candidates(&frame, &[]);
        let registry = registry_with("navigate_page", false, RiskLevel::Low);
        let (plan, needs_confirmation) = apply_site_policy(plan, Some(&registry), true);
        assert_eq!(plan[0].risk_level, RiskLevel::Medium);
        assert!(!needs_confirmation);
    }
}
