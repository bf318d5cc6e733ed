//! Per-site action registry (C8). Generalizes the teacher's
//! `HashMap<String, Arc<dyn Tool>>` tool registry and bounded `VecDeque`
//! call tracker into a registry keyed by site, where each entry carries the
//! spec's action schema rather than a hand-rolled per-tool `validate()`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use voice_agent_core::action::{ActionType, RiskLevel, SideEffecting};

use crate::error::{ActionError, Result};

/// Execution history retained per site, per the spec's `N=1000` cap.
const MAX_HISTORY_PER_SITE: usize = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    /// A JSON Schema fragment describing the parameter's type/enum/range.
    pub schema: serde_json::Value,
    #[serde(default)]
    pub description: String,
}

/// A registered site action: `{name, type, description, parameters[],
/// selector?, confirmation, sideEffecting, riskLevel, category}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub confirmation: bool,
    pub side_effecting: SideEffecting,
    pub risk_level: RiskLevel,
    pub category: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Invokes a registered action once its parameters have passed validation.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, parameters: &serde_json::Value) -> Result<ActionOutcome>;
}

/// What actually happened on the site as a result of an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub side_effects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub action_name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub side_effects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunResult {
    pub valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    pub estimated_duration_ms: u64,
    #[serde(default)]
    pub side_effects: Vec<String>,
}

/// One completed (or failed) execution, kept for the site's history.
#[derive(Debug, Clone)]
pub struct ActionCall {
    pub action_name: String,
    pub parameters: serde_json::Value,
    pub result: ExecuteResult,
    pub at: Instant,
}

struct RegisteredAction {
    definition: ActionDefinition,
    handler: Arc<dyn ActionHandler>,
}

/// Validates a parameter set against an action's declared schema, per the
/// spec: required-parameter presence and enum/range constraints are checked
/// before the handler ever runs. `jsonschema` drives the per-parameter
/// enum/range/type checks; required-field presence is checked separately
/// since a missing key has no JSON value to validate against.
fn validate_parameters(definition: &ActionDefinition, parameters: &serde_json::Value) -> Vec<String> {
    let mut issues = Vec::new();
    let object = parameters.as_object();

    for spec in &definition.parameters {
        let value = object.and_then(|o| o.get(&spec.name));
        match value {
            None if spec.required => {
                issues.push(format!("missing required parameter '{}'", spec.name));
            }
            None => {}
            Some(v) => {
                if spec.schema.is_object() || spec.schema.is_bool() {
                    match jsonschema::JSONSchema::compile(&spec.schema) {
                        Ok(compiled) => {
                            if let Err(errors) = compiled.validate(v) {
                                for error in errors {
                                    issues.push(format!("parameter '{}': {}", spec.name, error));
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(action = %definition.name, parameter = %spec.name, error = %e, "invalid parameter schema, skipping validation");
                        }
                    }
                }
            }
        }
    }
    issues
}

/// Registry of actions for a single tenant site, plus its bounded execution
/// history. One instance per site; the dispatcher below owns one per site.
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
    history: parking_lot::Mutex<VecDeque<ActionCall>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self { actions: HashMap::new(), history: parking_lot::Mutex::new(VecDeque::with_capacity(MAX_HISTORY_PER_SITE)) }
    }

    pub fn register(&mut self, definition: ActionDefinition, handler: Arc<dyn ActionHandler>) {
        self.actions.insert(definition.name.clone(), RegisteredAction { definition, handler });
    }

    pub fn has(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ActionDefinition> {
        self.actions.values().map(|a| a.definition.clone()).collect()
    }

    pub fn get_definition(&self, name: &str) -> Option<ActionDefinition> {
        self.actions.get(name).map(|a| a.definition.clone())
    }

    /// `dryRun`: validates without executing, returning the issues the live
    /// `execute` call would hit plus an estimate of how long it would take.
    pub fn dry_run(&self, request: &ExecuteRequest) -> DryRunResult {
        let Some(action) = self.actions.get(&request.action_name) else {
            return DryRunResult {
                valid: false,
                issues: vec![format!("unknown action '{}'", request.action_name)],
                estimated_duration_ms: 0,
                side_effects: Vec::new(),
            };
        };
        let issues = validate_parameters(&action.definition, &request.parameters);
        DryRunResult {
            valid: issues.is_empty(),
            issues,
            estimated_duration_ms: estimate_duration_ms(&action.definition),
            side_effects: side_effect_labels(&action.definition),
        }
    }

    /// Validates then executes. A validation failure returns
    /// `VALIDATION_ERROR` semantics (the action is never invoked) rather
    /// than an `Err`, matching the spec's `{success, error}` result shape.
    pub async fn execute(&self, request: ExecuteRequest) -> ExecuteResult {
        let started = Instant::now();
        let result = match self.actions.get(&request.action_name) {
            None => ExecuteResult {
                success: false,
                result: None,
                error: Some(format!("VALIDATION_ERROR: unknown action '{}'", request.action_name)),
                duration_ms: 0,
                side_effects: Vec::new(),
            },
            Some(action) => {
                let issues = validate_parameters(&action.definition, &request.parameters);
                if !issues.is_empty() {
                    ExecuteResult {
                        success: false,
                        result: None,
                        error: Some(format!("VALIDATION_ERROR: {}", issues.join("; "))),
                        duration_ms: started.elapsed().as_millis() as u64,
                        side_effects: Vec::new(),
                    }
                } else {
                    self.invoke_with_timeout(action, &request, started).await
                }
            }
        };

        self.record(request, result.clone());
        result
    }

    async fn invoke_with_timeout(&self, action: &RegisteredAction, request: &ExecuteRequest, started: Instant) -> ExecuteResult {
        let timeout = Duration::from_secs(action.definition.timeout_secs);
        match tokio::time::timeout(timeout, action.handler.invoke(&request.parameters)).await {
            Ok(Ok(outcome)) => ExecuteResult {
                success: true,
                result: outcome.result,
                error: None,
                duration_ms: started.elapsed().as_millis() as u64,
                side_effects: if outcome.side_effects.is_empty() { side_effect_labels(&action.definition) } else { outcome.side_effects },
            },
            Ok(Err(e)) => ExecuteResult {
                success: false,
                result: None,
                error: Some(e.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
                side_effects: Vec::new(),
            },
            Err(_elapsed) => ExecuteResult {
                success: false,
                result: None,
                error: Some(ActionError::Timeout(action.definition.timeout_secs).to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
                side_effects: Vec::new(),
            },
        }
    }

    fn record(&self, request: ExecuteRequest, result: ExecuteResult) {
        let mut history = self.history.lock();
        if history.len() >= MAX_HISTORY_PER_SITE {
            history.pop_front();
        }
        history.push_back(ActionCall { action_name: request.action_name, parameters: request.parameters, result, at: Instant::now() });
    }

    pub fn history(&self) -> Vec<ActionCall> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn side_effect_labels(definition: &ActionDefinition) -> Vec<String> {
    match definition.side_effecting {
        SideEffecting::Safe | SideEffecting::Read => Vec::new(),
        SideEffecting::Write => vec![format!("writes:{}", definition.category)],
        SideEffecting::Destructive => vec![format!("destructive:{}", definition.category)],
    }
}

fn estimate_duration_ms(definition: &ActionDefinition) -> u64 {
    match definition.action_type {
        ActionType::Navigation | ActionType::Button => 150,
        ActionType::Form => 400,
        ActionType::Api => 800,
        ActionType::Custom => 500,
    }
}

/// One `ActionRegistry` per tenant site, the dispatcher's composition root.
pub struct SiteActionDispatcher {
    sites: DashMap<String, Arc<ActionRegistry>>,
}

impl SiteActionDispatcher {
    pub fn new() -> Self {
        Self { sites: DashMap::new() }
    }

    pub fn register_site(&self, site_id: impl Into<String>, registry: ActionRegistry) {
        self.sites.insert(site_id.into(), Arc::new(registry));
    }

    pub fn site(&self, site_id: &str) -> Option<Arc<ActionRegistry>> {
        self.sites.get(site_id).map(|r| r.clone())
    }

    pub async fn execute(&self, site_id: &str, request: ExecuteRequest) -> Result<ExecuteResult> {
        let registry = self.site(site_id).ok_or_else(|| ActionError::NotFound(format!("unknown site '{site_id}'")))?;
        Ok(registry.execute(request).await)
    }

    pub fn dry_run(&self, site_id: &str, request: &ExecuteRequest) -> Result<DryRunResult> {
        let registry = self.site(site_id).ok_or_else(|| ActionError::NotFound(format!("unknown site '{site_id}'")))?;
        Ok(registry.dry_run(request))
    }
}

impl Default for SiteActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn invoke(&self, parameters: &serde_json::Value) -> Result<ActionOutcome> {
            Ok(ActionOutcome { result: Some(parameters.clone()), side_effects: Vec::new() })
        }
    }

    fn sample_definition() -> ActionDefinition {
        ActionDefinition {
            name: "search_events".to_string(),
            action_type: ActionType::Api,
            description: "Search events".to_string(),
            parameters: vec![ParameterSpec {
                name: "query".to_string(),
                required: true,
                schema: serde_json::json!({"type": "string", "minLength": 1}),
                description: "search text".to_string(),
            }],
            selector: None,
            confirmation: false,
            side_effecting: SideEffecting::Read,
            risk_level: RiskLevel::Low,
            category: "search".to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn missing_required_parameter_is_rejected_without_invoking_handler() {
        let mut registry = ActionRegistry::new();
        registry.register(sample_definition(), Arc::new(EchoHandler));

        let result = registry.execute(ExecuteRequest { action_name: "search_events".into(), parameters: serde_json::json!({}) }).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn valid_parameters_execute_successfully() {
        let mut registry = ActionRegistry::new();
        registry.register(sample_definition(), Arc::new(EchoHandler));

        let result = registry
            .execute(ExecuteRequest { action_name: "search_events".into(), parameters: serde_json::json!({"query": "jazz"}) })
            .await;
        assert!(result.success);
        assert_eq!(registry.history_len(), 1);
    }

    #[test]
    fn dry_run_reports_issues_without_executing() {
        let mut registry = ActionRegistry::new();
        registry.register(sample_definition(), Arc::new(EchoHandler));

        let result = registry.dry_run(&ExecuteRequest { action_name: "search_events".into(), parameters: serde_json::json!({"query": ""}) });
        assert!(!result.valid);
        assert_eq!(registry.history_len(), 0);
    }

    #[tokio::test]
    async fn history_is_bounded_per_site() {
        let mut registry = ActionRegistry::new();
        registry.register(sample_definition(), Arc::new(EchoHandler));

        for _ in 0..(MAX_HISTORY_PER_SITE + 10) {
            registry
                .execute(ExecuteRequest { action_name: "search_events".into(), parameters: serde_json::json!({"query": "x"}) })
                .await;
        }
        assert_eq!(registry.history_len(), MAX_HISTORY_PER_SITE);
    }
}
