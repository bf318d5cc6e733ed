//! Composition-root state shared across the HTTP and WebSocket surface.
//! Generic over the concrete `OutboxStore` the composition root picked at
//! startup (Scylla-backed in staging/production, in-memory for local dev).

use std::sync::Arc;

use voice_agent_agent::Orchestrator;
use voice_agent_config::Settings;
use voice_agent_outbox::AnalyticsEmitter;
use voice_agent_persistence::OutboxStore;
use voice_agent_security::{BudgetService, PrivacyAuditRing, SecurityGuards, TokenVerifier};

use crate::session::SessionRegistry;

pub struct AppState<S: OutboxStore> {
    pub config: Arc<Settings>,
    pub token_verifier: Arc<TokenVerifier>,
    pub security: Arc<SecurityGuards>,
    pub budget: Arc<BudgetService>,
    pub privacy_audit: Arc<PrivacyAuditRing>,
    pub orchestrator: Arc<Orchestrator<S>>,
    pub analytics: Arc<AnalyticsEmitter<S>>,
    pub sessions: Arc<SessionRegistry>,
}

// Manual `Clone` impl: every field is already an `Arc`, so this never
// actually requires `S: Clone` — the derive macro would add that bound
// incorrectly.
impl<S: OutboxStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            token_verifier: Arc::clone(&self.token_verifier),
            security: Arc::clone(&self.security),
            budget: Arc::clone(&self.budget),
            privacy_audit: Arc::clone(&self.privacy_audit),
            orchestrator: Arc::clone(&self.orchestrator),
            analytics: Arc::clone(&self.analytics),
            sessions: Arc::clone(&self.sessions),
        }
    }
}
