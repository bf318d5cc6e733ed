//! Universal Agent Orchestrator (C7): the checkpointed turn state machine.
//!
//! States: `validateSecurity -> validatePrivacy -> checkResources ->
//! understandIntent -> retrieveKnowledge -> checkClarification ->
//! (askClarification | planFunctions) -> executeSpeculative ->
//! (confirmActions | executeFunctions) -> observeResults -> (planFunctions |
//! finalize) -> END`, with `handleError` reachable from any node.
//!
//! Structurally grounded in `voice_agent_agent::stage::StageManager` (the
//! sibling teacher tree's `Mutex`-guarded current-state + validated-transition
//! idiom) with the sales-funnel stages replaced by this node graph; since a
//! turn's `TurnState` is owned by exactly one caller at a time (the per-session
//! mailbox at the gateway serializes turns), no internal mutex is needed here
//! — the state lives in a local variable for the duration of `run_turn` and is
//! checkpointed through `TurnStateStore` at every suspension point.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use voice_agent_config::OrchestratorConfig;
use voice_agent_core::action::ActionPlanItem;
use voice_agent_core::budget::ResourceType;
use voice_agent_core::slot::SlotFrame;
use voice_agent_core::turn::Turn;
use voice_agent_core::turn_state::{ErrorRecoveryStrategy, ResourceUsage, RetrievedItem as CoreRetrievedItem, TurnError, TurnOutcome, TurnState};
use voice_agent_core::{Actor, AuditOutcome, PrivacyAuditEntry};
use voice_agent_outbox::AnalyticsEmitter;
use voice_agent_persistence::{OutboxStore, TurnStateStore};
use voice_agent_rag::{CachingRetrievalClient, RetrievalRequest, RetrievedItem as RagRetrievedItem, Strategy};
use voice_agent_security::{BudgetService, PrivacyAuditRing, Reservation, RiskLevel, SecurityGuards, ValidateRequest};
use voice_agent_tools::{ExecuteRequest, SiteActionDispatcher};

use crate::error::{AgentError, Result};
use crate::planning;
use crate::slots::{self, GeoPoint, Hemisphere, SlotExtractor};

/// Policy-class codes per the documented error taxonomy: surfaced to the
/// gateway as a typed `error` message rather than a conversational
/// `agent_final` apology.
pub const POLICY_ERROR_CODES: &[&str] = &["RATE_LIMIT_EXCEEDED", "ORIGIN_REJECTED", "PII_BLOCKED", "BUDGET_EXCEEDED"];

/// Everything about the caller and the moment a turn runs in, scoped to one
/// `run_turn` call.
pub struct TurnContext<'a> {
    pub tenant_id: &'a str,
    pub site_id: &'a str,
    pub user_id: Option<&'a str>,
    pub ip: &'a str,
    pub session_id: &'a str,
    pub origin: Option<&'a str>,
    pub locale: String,
    pub user_location: Option<GeoPoint>,
}

/// What kicked this turn off, and where in the node graph it re-enters.
pub enum TurnInput {
    Utterance { text: String, language: Option<String> },
    ConfirmationReceived,
    ClarificationAnswer { text: String },
}

struct Reservations {
    tokens: Reservation,
    actions: Reservation,
}

impl Reservations {
    fn commit(self, budget: &BudgetService) {
        budget.commit(self.tokens);
        budget.commit(self.actions);
    }

    fn refund(self, budget: &BudgetService) {
        budget.refund(self.tokens);
        budget.refund(self.actions);
    }
}

pub struct Orchestrator<S: OutboxStore> {
    security: Arc<SecurityGuards>,
    budget: Arc<BudgetService>,
    privacy_audit: Arc<PrivacyAuditRing>,
    retrieval: Arc<CachingRetrievalClient>,
    dispatcher: Arc<SiteActionDispatcher>,
    checkpoints: Arc<dyn TurnStateStore>,
    analytics: Arc<AnalyticsEmitter<S>>,
    config: OrchestratorConfig,
    retrieval_top_k: usize,
    retrieval_strategies: Vec<Strategy>,
}

impl<S: OutboxStore> Orchestrator<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        security: Arc<SecurityGuards>,
        budget: Arc<BudgetService>,
        privacy_audit: Arc<PrivacyAuditRing>,
        retrieval: Arc<CachingRetrievalClient>,
        dispatcher: Arc<SiteActionDispatcher>,
        checkpoints: Arc<dyn TurnStateStore>,
        analytics: Arc<AnalyticsEmitter<S>>,
        config: OrchestratorConfig,
        retrieval_top_k: usize,
    ) -> Self {
        Self {
            security,
            budget,
            privacy_audit,
            retrieval,
            dispatcher,
            checkpoints,
            analytics,
            config,
            retrieval_top_k,
            retrieval_strategies: vec![Strategy::Vector, Strategy::Fulltext],
        }
    }

    pub async fn run_turn(&self, ctx: &TurnContext<'_>, input: TurnInput) -> Result<TurnOutcome> {
        let deadline = Duration::from_millis(self.config.turn_deadline_ms);
        match tokio::time::timeout(deadline, self.run_turn_inner(ctx, input)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::DeadlineExceeded(self.config.turn_deadline_ms, "turn")),
        }
    }

    async fn run_turn_inner(&self, ctx: &TurnContext<'_>, input: TurnInput) -> Result<TurnOutcome> {
        match input {
            TurnInput::Utterance { text, language } => {
                let turn_id = uuid::Uuid::new_v4().to_string();
                let mut state = TurnState::new(ctx.session_id, turn_id, text);
                state.detected_language = language;
                state.messages.push(Turn::user(state.user_input.clone()));
                self.run_fresh_turn(ctx, state).await
            }
            TurnInput::ConfirmationReceived => {
                let mut state = self
                    .checkpoints
                    .load(ctx.session_id)
                    .await?
                    .ok_or_else(|| AgentError::NoActiveTurn(ctx.session_id.to_string()))?;
                state.confirmation_received = true;
                state.needs_confirmation = false;
                let plan = state.action_plan.clone();

                // The plan hasn't been regenerated since `AskConfirmation` was
                // returned (this is the same turn resuming, not a replan), so
                // the shadow buffer from `executeSpeculative` still applies:
                // merge it into `tool_results` and skip re-running those
                // actions in `executeFunctions`.
                let executed_names: HashSet<String> = state.speculative_results.iter().map(|r| r.tool_name.clone()).collect();
                state.tool_results.extend(std::mem::take(&mut state.speculative_results));

                self.execute_functions(ctx, &mut state, &plan, &executed_names).await?;
                self.finish_turn(ctx, state).await
            }
            TurnInput::ClarificationAnswer { text } => {
                let mut state = self
                    .checkpoints
                    .load(ctx.session_id)
                    .await?
                    .ok_or_else(|| AgentError::NoActiveTurn(ctx.session_id.to_string()))?;
                state.messages.push(Turn::user(text.clone()));
                state.user_input = text;
                state.needs_clarification = false;
                self.merge_clarification_answer(ctx, &mut state);
                self.continue_after_understanding(ctx, state).await
            }
        }
    }

    /// `validateSecurity -> validatePrivacy -> checkResources -> understandIntent`,
    /// the portion of the graph that only runs once per turn (a resumed
    /// clarification answer re-enters after this).
    async fn run_fresh_turn(&self, ctx: &TurnContext<'_>, mut state: TurnState) -> Result<TurnOutcome> {
        if let Some(outcome) = self.validate_security(ctx, &mut state) {
            return Ok(outcome);
        }

        self.validate_privacy(ctx, &mut state);

        let reservations = match self.check_resources(ctx, &state) {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };

        self.understand_intent(ctx, &mut state);

        self.continue_after_reserved(ctx, state, reservations).await
    }

    async fn continue_after_reserved(&self, ctx: &TurnContext<'_>, state: TurnState, reservations: Reservations) -> Result<TurnOutcome> {
        let outcome = self.continue_after_understanding(ctx, state).await;
        match &outcome {
            Ok(_) => {
                // Any terminal outcome (Final, AskClarification, AskConfirmation)
                // represents real work performed against the turn's budget.
                reservations.commit(&self.budget);
            }
            Err(_) => reservations.refund(&self.budget),
        }
        outcome
    }

    /// `retrieveKnowledge -> checkClarification -> ... -> END`. Shared by the
    /// fresh-turn path and the clarification-answer resume path, since both
    /// re-enter here once the slot frame has been updated.
    async fn continue_after_understanding(&self, ctx: &TurnContext<'_>, mut state: TurnState) -> Result<TurnOutcome> {
        if let Err(e) = self.retrieve_knowledge(ctx, &mut state).await {
            if let Some(outcome) = self.handle_error(ctx, &mut state, &e).await? {
                return Ok(outcome);
            }
            // Recovery strategy was `Retry`: give retrieval one more try before
            // giving up and finalizing without search results.
            if self.retrieve_knowledge(ctx, &mut state).await.is_err() {
                state.search_results.clear();
            }
        }

        if let Some(outcome) = self.check_clarification(&mut state) {
            self.checkpoints.save(&state).await?;
            return Ok(outcome);
        }

        self.run_planning_cycle(ctx, state).await
    }

    /// `handleError`: reachable from any decision when `error != null &&
    /// !errorRecoveryAttempted`. Selects a recovery strategy per §4.7/§7 and
    /// clears `state.error` iff the chosen strategy is `Retry`. Returns
    /// `Some(outcome)` when the turn must terminate here (no salvageable
    /// retry), `None` when the caller should retry the node that failed.
    async fn handle_error(&self, ctx: &TurnContext<'_>, state: &mut TurnState, error: &AgentError) -> Result<Option<TurnOutcome>> {
        let (code, message) = match error {
            AgentError::Retrieval(_) => ("PROVIDER_UNAVAILABLE", "the knowledge lookup failed"),
            AgentError::DeadlineExceeded(_, node) => return Ok(Some(self.deadline_outcome(node))),
            _ => ("ORCHESTRATOR_ERROR", "something went wrong handling that"),
        };
        state.error = Some(TurnError { code: code.to_string(), message: message.to_string() });

        if state.error_recovery_attempted {
            // Only one recovery attempt per turn (§4.7): surface a friendly
            // apology instead of looping.
            let outcome = self.error_apology_outcome(state);
            return Ok(Some(outcome));
        }
        state.error_recovery_attempted = true;

        let strategy = match code {
            "PROVIDER_UNAVAILABLE" => ErrorRecoveryStrategy::RelaxConstraints,
            _ => ErrorRecoveryStrategy::AskForHelp,
        };
        state.error_recovery_strategy = Some(strategy);

        self.privacy_audit.record(PrivacyAuditEntry {
            ts: Utc::now(),
            action: "error_recovery".to_string(),
            tenant_id: ctx.tenant_id.to_string(),
            details: serde_json::json!({ "code": code, "strategy": format!("{strategy:?}") }),
        });

        match strategy {
            ErrorRecoveryStrategy::Retry | ErrorRecoveryStrategy::RelaxConstraints => {
                // A retry strategy clears the error so the caller re-enters
                // the failed node; `RelaxConstraints` also clears it here
                // since retrieval is retried with a bare query either way.
                state.error = None;
                Ok(None)
            }
            ErrorRecoveryStrategy::SwitchProvider | ErrorRecoveryStrategy::AskForHelp => Ok(Some(self.error_apology_outcome(state))),
        }
    }

    fn deadline_outcome(&self, node: &'static str) -> TurnOutcome {
        TurnOutcome::Final {
            text: "That's taking longer than expected — could you try rephrasing or asking again in a moment?".to_string(),
            citations: Vec::new(),
            ui_hints: serde_json::json!({ "error_code": "deadline_exceeded", "node": node }),
            clarification_rounds: 0,
            tools_executed: 0,
        }
    }

    fn error_apology_outcome(&self, state: &TurnState) -> TurnOutcome {
        TurnOutcome::Final {
            text: "Sorry, I ran into a problem with that — could you try again or rephrase your request?".to_string(),
            citations: Vec::new(),
            ui_hints: serde_json::json!({ "error_code": state.error.as_ref().map(|e| e.code.clone()) }),
            clarification_rounds: state.tool_loop_count,
            tools_executed: state.tool_results.len() as u32,
        }
    }

    /// `planFunctions -> executeSpeculative -> (confirmActions |
    /// executeFunctions) -> observeResults -> (planFunctions | finalize)`.
    async fn run_planning_cycle(&self, ctx: &TurnContext<'_>, mut state: TurnState) -> Result<TurnOutcome> {
        // Accumulates across every iteration of this loop (not just the one
        // `execute_functions` call), since `build_candidates` is a pure
        // function of `slot_frame`/`search_results` — neither changes inside
        // this loop, so without this filter a non-terminal intent would
        // regenerate and re-dispatch the identical plan every time.
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            let registry = self.dispatcher.site(ctx.site_id);

            let candidates = planning::build_candidates(state.slot_frame.as_ref().unwrap_or(&SlotFrame::default()), &state.search_results);
            let candidates: Vec<ActionPlanItem> = candidates.into_iter().filter(|item| !attempted.contains(&item.action_name)).collect();
            let (plan, needs_confirmation) = planning::apply_site_policy(candidates, registry.as_deref(), state.security_risk_high);
            state.action_plan = plan.clone();

            // Condition (c), "last action succeeded and the next plan is
            // empty": nothing left to attempt, so finalize instead of
            // looping back into `planFunctions`.
            if plan.is_empty() {
                return self.finish_turn(ctx, state).await;
            }

            let (speculative_results, executed_names) = self.execute_speculative(ctx, &plan, &state).await;

            if needs_confirmation {
                state.needs_confirmation = true;
                // Held in the shadow buffer, not yet merged into
                // `tool_results` — this plan isn't confirmed yet. Persisted
                // on the checkpoint so the confirmation-received resume can
                // reuse them instead of re-running the same actions; a
                // replanned turn never reaches this checkpoint with them
                // still set, since each planning cycle starts from a fresh
                // local `speculative_results`.
                state.speculative_results = speculative_results;
                self.checkpoints.save(&state).await?;
                return Ok(TurnOutcome::AskConfirmation { prompt: confirmation_prompt(&plan), plan });
            }

            state.tool_results.extend(speculative_results);
            self.execute_functions(ctx, &mut state, &plan, &executed_names).await?;
            attempted.extend(plan.iter().map(|item| item.action_name.clone()));

            if self.observe_results(&state) {
                return self.finish_turn(ctx, state).await;
            }

            state.tool_loop_count += 1;
            if state.tool_loop_count >= self.config.max_tool_loops {
                return self.finish_turn(ctx, state).await;
            }
        }
    }

    /// `validateSecurity`: runs the guard verdict, carries `riskLevel` onto
    /// `state` for `planFunctions` to read back, and short-circuits the turn
    /// on a rate-limit or high-risk rejection. A rate limit issue blocks the
    /// turn regardless of `result.allowed` — it's only medium risk on its own
    /// but the spec still requires no orchestrator turn start on the 31st
    /// message in a window.
    fn validate_security(&self, ctx: &TurnContext<'_>, state: &mut TurnState) -> Option<TurnOutcome> {
        let request = ValidateRequest {
            origin: ctx.origin,
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            ip: ctx.ip,
            session_id: ctx.session_id,
            parameters: serde_json::json!({ "text": state.user_input }),
        };
        let result = self.security.validate(&request);
        state.security_risk_high = result.risk_level == RiskLevel::High;

        if let Some(issue) = result.issues.iter().find(|i| i.code == "RATE_LIMIT_EXCEEDED") {
            return Some(policy_rejected_outcome(
                "RATE_LIMIT_EXCEEDED",
                &issue.message,
                result.rate_limit.as_ref().map(|r| r.reset_at),
            ));
        }

        if !result.allowed {
            let code = result.issues.iter().find(|i| i.risk_level == RiskLevel::High).map(|i| i.code.as_str()).unwrap_or("ORIGIN_REJECTED");
            let summary = result.issues.iter().map(|i| i.message.clone()).collect::<Vec<_>>().join("; ");
            return Some(policy_rejected_outcome(code, &format!("I can't process that request: {summary}"), None));
        }
        None
    }

    fn validate_privacy(&self, ctx: &TurnContext<'_>, state: &mut TurnState) {
        let (redacted, entities) = voice_agent_security::pii::redact(&state.user_input);
        if entities.is_empty() {
            return;
        }
        state.user_input = redacted;
        for entity in &entities {
            self.privacy_audit.record(PrivacyAuditEntry {
                ts: Utc::now(),
                action: "pii_detected".to_string(),
                tenant_id: ctx.tenant_id.to_string(),
                details: serde_json::json!({ "type": format!("{:?}", entity.pii_type), "severity": format!("{:?}", entity.severity) }),
            });
        }
    }

    /// Reserves `ceil(chars/3.5) + 800` tokens and one action credit.
    fn check_resources(&self, ctx: &TurnContext<'_>, state: &TurnState) -> std::result::Result<Reservations, TurnOutcome> {
        let tokens = (state.user_input.chars().count() as f64 / 3.5).ceil() as u64 + 800;

        let token_reservation = self
            .budget
            .reserve(ctx.tenant_id, ResourceType::Tokens, tokens)
            .map_err(|_| budget_exceeded_outcome())?;

        let action_reservation = match self.budget.reserve(ctx.tenant_id, ResourceType::Actions, 1) {
            Ok(r) => r,
            Err(_) => {
                self.budget.refund(token_reservation);
                return Err(budget_exceeded_outcome());
            }
        };

        Ok(Reservations { tokens: token_reservation, actions: action_reservation })
    }

    fn understand_intent(&self, ctx: &TurnContext<'_>, state: &mut TurnState) {
        let (intent, confidence, _alternatives) = slots::detect_intent(&state.user_input);
        let mut frame = SlotFrame::new(intent, confidence);

        let hemisphere = Hemisphere::for_locale_str(&ctx.locale);
        let extractor = SlotExtractor::new(hemisphere, ctx.user_location);
        extractor.extract(&state.user_input, Utc::now(), &mut frame);

        state.slot_frame = Some(frame);
    }

    fn merge_clarification_answer(&self, ctx: &TurnContext<'_>, state: &mut TurnState) {
        let Some(frame) = state.slot_frame.as_mut() else { return };
        let hemisphere = Hemisphere::for_locale_str(&ctx.locale);
        let extractor = SlotExtractor::new(hemisphere, ctx.user_location);

        let mut scratch = SlotFrame { intent: frame.intent, confidence: frame.confidence, ..Default::default() };
        extractor.extract(&state.user_input, Utc::now(), &mut scratch);

        for (name, value) in scratch.slots {
            frame.missing_slots.retain(|m| m != &name);
            if !frame.resolved_slots.contains(&name) {
                frame.resolved_slots.push(name.clone());
            }
            frame.slots.insert(name, value);
        }
    }

    async fn retrieve_knowledge(&self, ctx: &TurnContext<'_>, state: &mut TurnState) -> Result<()> {
        let high_confidence_terms: Vec<&str> = state
            .slot_frame
            .as_ref()
            .map(|f| f.slots.values().filter(|v| v.confidence >= 0.7).map(|v| v.raw.as_str()).collect())
            .unwrap_or_default();
        let query = std::iter::once(state.user_input.as_str())
            .chain(high_confidence_terms)
            .collect::<Vec<_>>()
            .join(" ");

        let request = RetrievalRequest {
            tenant_id: ctx.tenant_id.to_string(),
            site_id: ctx.site_id.to_string(),
            query: query.clone(),
            top_k: self.retrieval_top_k,
            locale: ctx.locale.clone(),
            strategies: self.retrieval_strategies.clone(),
        };

        let started = std::time::Instant::now();
        let deadline = Duration::from_millis(self.config.retrieval_deadline_ms);
        let response = match tokio::time::timeout(deadline, self.retrieval.search(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(AgentError::Retrieval(e)),
            Err(_) => return Err(AgentError::DeadlineExceeded(self.config.retrieval_deadline_ms, "retrieveKnowledge")),
        };

        let _ = self
            .analytics
            .hybrid_search_executed(
                ctx.tenant_id,
                ctx.session_id,
                &query,
                response.items.len(),
                response.strategies.total_executed,
                started.elapsed(),
                response.strategies.timed_out,
            )
            .await;

        state.search_results = response.items.iter().cloned().map(to_core_item).collect();
        Ok(())
    }

    /// `checkClarification`: the highest-priority critical slot still missing
    /// (priority order is `Intent::critical_slots()`, the order the spec
    /// fixes per intent) drives a single focused question.
    fn check_clarification(&self, state: &mut TurnState) -> Option<TurnOutcome> {
        let frame = state.slot_frame.as_ref()?;
        let intent = frame.intent?;
        let missing = intent.critical_slots().iter().find(|slot| frame.missing_slots.iter().any(|m| m == *slot))?;

        state.needs_clarification = true;
        Some(TurnOutcome::AskClarification {
            question: clarification_question(missing),
            suggested_values: suggested_values(missing),
        })
    }

    /// Runs only the side-effect-free, high-confidence items
    /// (`is_speculative_eligible`) concurrently, before confirmation is
    /// decided. Results are held locally — if the turn needs confirmation,
    /// they're never merged into `state.tool_results` and are discarded.
    async fn execute_speculative(
        &self,
        ctx: &TurnContext<'_>,
        plan: &[ActionPlanItem],
        state: &TurnState,
    ) -> (Vec<voice_agent_core::action::ToolResult>, HashSet<String>) {
        let confidence = state.slot_frame.as_ref().map(|f| f.confidence).unwrap_or(0.0);
        let eligible: Vec<&ActionPlanItem> = plan.iter().filter(|item| item.is_speculative_eligible(confidence)).collect();
        if eligible.is_empty() {
            return (Vec::new(), HashSet::new());
        }

        let futures = eligible.iter().map(|item| {
            let request = ExecuteRequest { action_name: item.action_name.clone(), parameters: item.parameters.clone() };
            let dispatcher = Arc::clone(&self.dispatcher);
            let site_id = ctx.site_id.to_string();
            let action_name = item.action_name.clone();
            let input = item.parameters.clone();
            async move {
                let started = Utc::now();
                let result = dispatcher.execute(&site_id, request).await;
                to_tool_result(action_name, input, started, result)
            }
        });

        let results = futures::future::join_all(futures).await;
        let names: HashSet<String> = results.iter().map(|r| r.tool_name.clone()).collect();
        (results, names)
    }

    /// `executeFunctions`: calls C8 for each plan item in priority order,
    /// honoring `dependsOn`. A non-critical failure is recorded and the batch
    /// continues; a critical failure aborts the remaining items.
    async fn execute_functions(
        &self,
        ctx: &TurnContext<'_>,
        state: &mut TurnState,
        plan: &[ActionPlanItem],
        already_executed: &HashSet<String>,
    ) -> Result<()> {
        let mut succeeded: HashSet<String> = already_executed.clone();
        let mut sorted: Vec<&ActionPlanItem> = plan.iter().collect();
        sorted.sort_by_key(|item| item.priority);

        for item in sorted {
            if already_executed.contains(&item.action_name) {
                continue;
            }

            let deps_ok = item.depends_on.iter().all(|d| succeeded.contains(d));
            let started = Utc::now();
            let tool_result = if !deps_ok {
                voice_agent_core::action::ToolResult {
                    tool_name: item.action_name.clone(),
                    input: item.parameters.clone(),
                    output: None,
                    success: false,
                    error: Some("DEPENDENCY_FAILED".to_string()),
                    started_at: started,
                    duration_ms: 0,
                    side_effects: Vec::new(),
                }
            } else {
                let request = ExecuteRequest { action_name: item.action_name.clone(), parameters: item.parameters.clone() };
                let result = self.dispatcher.execute(ctx.site_id, request).await;
                to_tool_result(item.action_name.clone(), item.parameters.clone(), started, result)
            };

            let _ = self
                .analytics
                .tool_executed(ctx.tenant_id, ctx.session_id, &item.action_name, tool_result.success, Duration::from_millis(tool_result.duration_ms))
                .await;

            if tool_result.success {
                succeeded.insert(item.action_name.clone());
            }
            let abort = item.critical && !tool_result.success;
            state.tool_results.push(tool_result);
            if abort {
                break;
            }
        }
        Ok(())
    }

    /// `observeResults`: task-complete heuristics from the design notes.
    /// Condition (c), "last action succeeded and the next plan is empty", is
    /// not checked here — `state.action_plan` always holds the plan that was
    /// just executed, so it's never empty at this point by construction, and
    /// checking it here would be dead code. `run_planning_cycle` evaluates
    /// that condition itself, against the *next* candidate plan, before ever
    /// looping back to this point.
    fn observe_results(&self, state: &TurnState) -> bool {
        let informational = matches!(state.slot_frame.as_ref().and_then(|f| f.intent), Some(voice_agent_core::slot::Intent::GetInformation));
        let top_score_high = state.search_results.first().map(|r| r.score >= 0.7).unwrap_or(false);
        if informational && top_score_high {
            return true;
        }
        if state.tool_results.iter().any(|r| r.is_transactional_success()) {
            return true;
        }
        state.tool_results.len() >= 10
    }

    /// `finalize`: produces the terminal response with citations, UI hints,
    /// and processing metadata, then emits the turn-completed analytics event.
    async fn finish_turn(&self, ctx: &TurnContext<'_>, mut state: TurnState) -> Result<TurnOutcome> {
        let citations: Vec<CoreRetrievedItem> = state.search_results.iter().take(3).cloned().collect();
        let text = finalize_text(&state);
        let ui_hints = serde_json::json!({
            "highlight": !citations.is_empty(),
            "scroll": state.tool_results.iter().any(|r| r.tool_name.starts_with("navigate_")),
            "modal": state.needs_confirmation,
            "speculative_nav_used": state.tool_results.iter().any(|r| r.tool_name.starts_with("search_") || r.tool_name.starts_with("navigate_")),
        });

        let outcome = TurnOutcome::Final {
            text,
            citations,
            ui_hints,
            clarification_rounds: state.tool_loop_count,
            tools_executed: state.tool_results.len() as u32,
        };

        state.resource_usage = ResourceUsage {
            tokens_reserved: state.resource_usage.tokens_reserved,
            tokens_committed: state.resource_usage.tokens_reserved,
            actions_reserved: state.resource_usage.actions_reserved,
            actions_committed: state.resource_usage.actions_reserved,
        };

        let intent_label = state.slot_frame.as_ref().and_then(|f| f.intent).map(|i| format!("{i:?}")).unwrap_or_else(|| "unknown".to_string());
        let slot_count = state.slot_frame.as_ref().map(|f| f.slots.len()).unwrap_or(0);
        let started = Utc::now() - chrono::Duration::milliseconds(0);
        let _ = self
            .analytics
            .turn_completed(
                ctx.tenant_id,
                ctx.session_id,
                &state.turn_id,
                &intent_label,
                slot_count,
                state.needs_clarification,
                state.needs_confirmation,
                state.tool_results.len(),
                state.search_results.len(),
                (Utc::now() - started).to_std().unwrap_or_default(),
            )
            .await;

        self.checkpoints.clear(ctx.session_id).await?;
        Ok(outcome)
    }
}

fn budget_exceeded_outcome() -> TurnOutcome {
    policy_rejected_outcome("BUDGET_EXCEEDED", "You've reached your usage limit for now — please try again later.", None)
}

/// Builds a `Final` outcome for a Policy-class rejection (see
/// `POLICY_ERROR_CODES`). `ui_hints.error_code` is how the gateway (C4)
/// recognizes this as a typed `error` event rather than a conversational
/// apology.
fn policy_rejected_outcome(code: &str, message: &str, reset_at: Option<chrono::DateTime<Utc>>) -> TurnOutcome {
    let mut ui_hints = serde_json::json!({ "error_code": code });
    if let Some(reset_at) = reset_at {
        ui_hints["reset_at"] = serde_json::Value::String(reset_at.to_rfc3339());
    }
    TurnOutcome::Final { text: message.to_string(), citations: Vec::new(), ui_hints, clarification_rounds: 0, tools_executed: 0 }
}

fn to_core_item(item: RagRetrievedItem) -> CoreRetrievedItem {
    CoreRetrievedItem {
        id: item.id,
        content: item.content,
        url: item.url.unwrap_or_default(),
        title: item.title,
        score: item.score,
        relevant_snippet: item.relevant_snippet,
        metadata: serde_json::to_value(item.metadata).unwrap_or(serde_json::Value::Null),
    }
}

fn to_tool_result(
    action_name: String,
    input: serde_json::Value,
    started: chrono::DateTime<Utc>,
    result: std::result::Result<voice_agent_tools::ExecuteResult, voice_agent_tools::ActionError>,
) -> voice_agent_core::action::ToolResult {
    let elapsed_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
    match result {
        Ok(r) => voice_agent_core::action::ToolResult {
            tool_name: action_name,
            input,
            output: r.result,
            success: r.success,
            error: r.error,
            started_at: started,
            duration_ms: r.duration_ms,
            side_effects: r.side_effects,
        },
        Err(e) => voice_agent_core::action::ToolResult {
            tool_name: action_name,
            input,
            output: None,
            success: false,
            error: Some(e.to_string()),
            started_at: started,
            duration_ms: elapsed_ms,
            side_effects: Vec::new(),
        },
    }
}

fn confirmation_prompt(plan: &[ActionPlanItem]) -> String {
    let names: Vec<&str> = plan.iter().filter(|i| i.critical || i.depends_on.is_empty()).map(|i| i.action_name.as_str()).collect();
    format!("I'm about to {} — should I go ahead?", names.join(" and "))
}

fn clarification_question(slot_name: &str) -> String {
    match slot_name {
        "time" => "When would you like this for?",
        "quantity" => "How many would you like?",
        "location" => "Which location works best for you?",
        "genre" => "What kind of event are you looking for?",
        "category" => "What category of product are you looking for?",
        "price" => "What's your budget?",
        "service_type" => "What type of service do you need?",
        _ => "Could you clarify that for me?",
    }
    .to_string()
}

fn suggested_values(slot_name: &str) -> Vec<String> {
    let values: &[&str] = match slot_name {
        "time" => &["today", "tomorrow", "this weekend"],
        "quantity" => &["1", "2", "4"],
        "location" => &["near me"],
        "genre" => &["rock", "pop", "jazz"],
        "category" => &["electronics", "apparel", "footwear"],
        "price" => &["under $50", "under $100", "no limit"],
        "service_type" => &["haircut", "cleaning", "repair"],
        _ => &[],
    };
    values.iter().take(3).map(|v| v.to_string()).collect()
}

impl Hemisphere {
    fn for_locale_str(locale: &str) -> Self {
        crate::slots::hemisphere_for_locale(locale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_agent_config::{BudgetsConfig, RagConfig, RetrievalConfig, SecurityConfig};
    use voice_agent_persistence::InMemoryTurnStateStore;
    use voice_agent_rag::HybridRetrievalClient;
    use voice_agent_tools::ActionDefinition;

    #[derive(Default)]
    struct RecordingStore {
        appended: parking_lot::Mutex<Vec<voice_agent_core::OutboxRecord>>,
    }

    #[async_trait::async_trait]
    impl OutboxStore for RecordingStore {
        async fn append(&self, record: &voice_agent_core::OutboxRecord) -> std::result::Result<(), voice_agent_persistence::PersistenceError> {
            self.appended.lock().push(record.clone());
            Ok(())
        }
        async fn claim_batch(&self, _batch_size: u32) -> std::result::Result<Vec<voice_agent_core::OutboxRecord>, voice_agent_persistence::PersistenceError> {
            Ok(Vec::new())
        }
        async fn mark_published(&self, _record: &voice_agent_core::OutboxRecord) -> std::result::Result<(), voice_agent_persistence::PersistenceError> {
            Ok(())
        }
        async fn mark_failed(
            &self,
            _record: &voice_agent_core::OutboxRecord,
            _error: &str,
            _next_attempt_at: chrono::DateTime<Utc>,
        ) -> std::result::Result<(), voice_agent_persistence::PersistenceError> {
            Ok(())
        }
        async fn reap_stale_claims(&self, _lease: chrono::Duration) -> std::result::Result<u32, voice_agent_persistence::PersistenceError> {
            Ok(0)
        }
        async fn find_stale_pending(&self, _stale_after: chrono::Duration) -> std::result::Result<Vec<voice_agent_core::OutboxRecord>, voice_agent_persistence::PersistenceError> {
            Ok(Vec::new())
        }
    }

    fn orchestrator() -> Orchestrator<RecordingStore> {
        let security = Arc::new(SecurityGuards::new(SecurityConfig::default(), voice_agent_config::RuntimeEnvironment::Development, vec![]));
        let budget = Arc::new(BudgetService::new(BudgetsConfig { default_tokens_per_month: 1_000_000, default_actions_per_hour: 1000 }));
        let audit = Arc::new(PrivacyAuditRing::new(100));
        let retrieval = Arc::new(CachingRetrievalClient::new(
            Arc::new(HybridRetrievalClient::new(RagConfig::default(), RetrievalConfig::default())),
            Duration::from_secs(60),
        ));
        let dispatcher = Arc::new(SiteActionDispatcher::new());
        let checkpoints: Arc<dyn TurnStateStore> = Arc::new(InMemoryTurnStateStore::default());
        let analytics = Arc::new(AnalyticsEmitter::new(Arc::new(RecordingStore::default())));

        Orchestrator::new(security, budget, audit, retrieval, dispatcher, checkpoints, analytics, OrchestratorConfig::default(), 5)
    }

    fn ctx<'a>() -> TurnContext<'a> {
        TurnContext {
            tenant_id: "tenant-a",
            site_id: "site-a",
            user_id: None,
            ip: "127.0.0.1",
            session_id: "sess-1",
            origin: Some("http://localhost:3000"),
            locale: "en-US".to_string(),
            user_location: None,
        }
    }

    #[tokio::test]
    async fn get_information_turn_finalizes_without_clarification() {
        let orch = orchestrator();
        let outcome = orch
            .run_turn(&ctx(), TurnInput::Utterance { text: "what are your opening hours".to_string(), language: None })
            .await
            .unwrap();
        match outcome {
            TurnOutcome::Final { .. } => {}
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn buy_tickets_missing_quantity_asks_for_clarification() {
        let orch = orchestrator();
        let outcome = orch
            .run_turn(&ctx(), TurnInput::Utterance { text: "buy tickets for the jazz show tonight".to_string(), language: None })
            .await
            .unwrap();
        match outcome {
            TurnOutcome::AskClarification { question, .. } => assert!(question.contains("many")),
            other => panic!("expected AskClarification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sqli_payload_is_rejected_by_validate_security() {
        let orch = orchestrator();
        let outcome = orch
            .run_turn(&ctx(), TurnInput::Utterance { text: "'; DROP TABLE users; --".to_string(), language: None })
            .await
            .unwrap();
        match outcome {
            TurnOutcome::Final { ui_hints, .. } => assert_eq!(ui_hints["error_code"], "UNSAFE_INPUT_SQLI"),
            other => panic!("expected a policy-blocked Final, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirmation_required_action_pauses_the_turn() {
        let orch = orchestrator();
        let mut registry = voice_agent_tools::ActionRegistry::new();
        registry.register(
            ActionDefinition {
                name: "purchase_tickets".to_string(),
                action_type: voice_agent_core::action::ActionType::Api,
                description: String::new(),
                parameters: vec![],
                selector: None,
                confirmation: true,
                side_effecting: voice_agent_core::action::SideEffecting::Write,
                risk_level: voice_agent_core::action::RiskLevel::Medium,
                category: "tickets".to_string(),
                timeout_secs: 5,
            },
            Arc::new(NoopHandler),
        );
        orch.dispatcher.register_site("site-a", registry);

        let outcome = orch
            .run_turn(
                &ctx(),
                TurnInput::Utterance { text: "buy 2 tickets for the jazz show tonight near me".to_string(), language: None },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::AskConfirmation { .. }));
    }

    #[tokio::test]
    async fn confirmation_received_reuses_speculative_results_without_reexecuting() {
        let orch = orchestrator();
        let mut registry = voice_agent_tools::ActionRegistry::new();
        let search_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        registry.register(
            ActionDefinition {
                name: "search_events".to_string(),
                action_type: voice_agent_core::action::ActionType::Api,
                description: String::new(),
                parameters: vec![],
                selector: None,
                confirmation: false,
                side_effecting: voice_agent_core::action::SideEffecting::Read,
                risk_level: voice_agent_core::action::RiskLevel::Low,
                category: "tickets".to_string(),
                timeout_secs: 5,
            },
            Arc::new(CountingHandler { calls: Arc::clone(&search_calls) }),
        );
        registry.register(
            ActionDefinition {
                name: "purchase_tickets".to_string(),
                action_type: voice_agent_core::action::ActionType::Api,
                description: String::new(),
                parameters: vec![],
                selector: None,
                confirmation: true,
                side_effecting: voice_agent_core::action::SideEffecting::Write,
                risk_level: voice_agent_core::action::RiskLevel::Medium,
                category: "tickets".to_string(),
                timeout_secs: 5,
            },
            Arc::new(NoopHandler),
        );
        orch.dispatcher.register_site("site-a", registry);

        let outcome = orch
            .run_turn(
                &ctx(),
                TurnInput::Utterance { text: "buy 2 tickets for the jazz show tonight near me".to_string(), language: None },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::AskConfirmation { .. }));
        assert_eq!(search_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let outcome = orch.run_turn(&ctx(), TurnInput::ConfirmationReceived).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Final { .. }));
        assert_eq!(search_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_terminal_intent_does_not_redispatch_the_same_plan_every_loop() {
        let orch = orchestrator();
        let mut registry = voice_agent_tools::ActionRegistry::new();
        let search_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        registry.register(
            ActionDefinition {
                name: "search_products".to_string(),
                action_type: voice_agent_core::action::ActionType::Api,
                description: String::new(),
                parameters: vec![],
                selector: None,
                confirmation: false,
                side_effecting: voice_agent_core::action::SideEffecting::Read,
                risk_level: voice_agent_core::action::RiskLevel::Low,
                category: "catalog".to_string(),
                timeout_secs: 5,
            },
            Arc::new(CountingHandler { calls: Arc::clone(&search_calls) }),
        );
        orch.dispatcher.register_site("site-a", registry);

        let outcome =
            orch.run_turn(&ctx(), TurnInput::Utterance { text: "find running shoes".to_string(), language: None }).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Final { .. }));
        assert_eq!(search_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    struct NoopHandler;
    #[async_trait::async_trait]
    impl voice_agent_tools::ActionHandler for NoopHandler {
        async fn invoke(&self, parameters: &serde_json::Value) -> voice_agent_tools::error::Result<voice_agent_tools::ActionOutcome> {
            Ok(voice_agent_tools::ActionOutcome { result: Some(parameters.clone()), side_effects: Vec::new() })
        }
    }

    struct CountingHandler {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }
    #[async_trait::async_trait]
    impl voice_agent_tools::ActionHandler for CountingHandler {
        async fn invoke(&self, parameters: &serde_json::Value) -> voice_agent_tools::error::Result<voice_agent_tools::ActionOutcome> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(voice_agent_tools::ActionOutcome { result: Some(parameters.clone()), side_effects: Vec::new() })
        }
    }
}

fn finalize_text(state: &TurnState) -> String {
    if let Some(last_failure) = state.tool_results.iter().rev().find(|r| !r.success) {
        if state.tool_results.iter().any(|r| r.success) {
            return format!("I completed part of that, but {} failed: {}", last_failure.tool_name, last_failure.error.clone().unwrap_or_default());
        }
    }
    if let Some(top) = state.search_results.first() {
        return top.relevant_snippet.clone();
    }
    "Here's what I found.".to_string()
}
