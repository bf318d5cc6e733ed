//! Layered application settings.
//!
//! Settings are loaded from (in increasing priority) a base file, an
//! environment-specific file, and `VOICE_AGENT__*` environment variables,
//! using the `config` crate's layered builder. Every section carries
//! `#[serde(default = "...")]` functions so a bare `{}` document still
//! produces a usable `Settings` value — this matters for tests and for
//! local development where only a handful of knobs are ever overridden.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Staging and production both run with strict validation (no auth
    /// bypass, no permissive CORS, secrets required).
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

impl std::str::FromStr for RuntimeEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::InvalidValue {
                field: "environment".to_string(),
                message: format!("unknown environment '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub ws: WsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub budgets: BudgetsConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_security()?;
        self.validate_ws()?;
        self.validate_audio()?;
        self.validate_orchestrator()?;
        self.validate_retrieval()?;
        self.validate_rag()?;
        self.validate_budgets()?;
        self.validate_outbox()?;
        self.validate_persistence()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        if server.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_connections".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.environment.is_production() && server.cors_enabled && server.cors_origins.is_empty() {
            tracing::warn!("CORS is enabled in production but no origins are configured");
        }
        Ok(())
    }

    fn validate_security(&self) -> Result<(), ConfigError> {
        let security = &self.security;
        if self.environment.is_strict() {
            if !security.jwt_enabled {
                return Err(ConfigError::InvalidValue {
                    field: "security.jwt_enabled".to_string(),
                    message: "JWT auth cannot be disabled outside development".to_string(),
                });
            }
            if security.dev_bypass_tenant_id.is_some() {
                return Err(ConfigError::InvalidValue {
                    field: "security.dev_bypass_tenant_id".to_string(),
                    message: "dev bypass is only permitted in development".to_string(),
                });
            }
        }
        let rl = &security.rate_limits;
        if rl.tenant_per_minute == 0 || rl.user_per_minute == 0 || rl.ip_per_minute == 0 || rl.session_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                field: "security.rate_limits".to_string(),
                message: "all rate limit scopes must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    fn validate_ws(&self) -> Result<(), ConfigError> {
        if self.ws.ping_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ws.ping_interval_ms".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    fn validate_audio(&self) -> Result<(), ConfigError> {
        if !crate::constants::audio::ALLOWED_FRAME_MS.contains(&self.audio.frame_ms) {
            return Err(ConfigError::InvalidValue {
                field: "audio.frame_ms".to_string(),
                message: format!(
                    "frame_ms must be one of {:?}",
                    crate::constants::audio::ALLOWED_FRAME_MS
                ),
            });
        }
        Ok(())
    }

    fn validate_orchestrator(&self) -> Result<(), ConfigError> {
        let o = &self.orchestrator;
        if o.max_tool_loops == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.max_tool_loops".to_string(),
                message: "must allow at least one tool loop".to_string(),
            });
        }
        let sum = o.intent_deadline_ms + o.retrieval_deadline_ms + o.planning_deadline_ms + o.dispatch_deadline_ms;
        if sum > o.turn_deadline_ms * 2 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.turn_deadline_ms".to_string(),
                message: "per-stage deadlines are inconsistent with the overall turn deadline".to_string(),
            });
        }
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        if self.retrieval.soft_timeout_ms > self.retrieval.hard_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.soft_timeout_ms".to_string(),
                message: "soft timeout must not exceed hard timeout".to_string(),
            });
        }
        Ok(())
    }

    fn validate_rag(&self) -> Result<(), ConfigError> {
        let rag = &self.rag;
        if !(0.0..=1.0).contains(&rag.dense_weight) {
            return Err(ConfigError::InvalidValue {
                field: "rag.dense_weight".to_string(),
                message: format!("must be between 0.0 and 1.0, got {}", rag.dense_weight),
            });
        }
        if !(0.0..=1.0).contains(&rag.min_score) {
            return Err(ConfigError::InvalidValue {
                field: "rag.min_score".to_string(),
                message: format!("must be between 0.0 and 1.0, got {}", rag.min_score),
            });
        }
        if rag.rrf_k <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.rrf_k".to_string(),
                message: format!("must be positive, got {}", rag.rrf_k),
            });
        }
        if rag.final_top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.final_top_k".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if rag.final_top_k > rag.dense_top_k.max(rag.sparse_top_k) {
            tracing::warn!(
                "rag.final_top_k ({}) exceeds both dense_top_k ({}) and sparse_top_k ({}); \
                 results will be limited by retrieval",
                rag.final_top_k,
                rag.dense_top_k,
                rag.sparse_top_k
            );
        }
        Ok(())
    }

    fn validate_budgets(&self) -> Result<(), ConfigError> {
        if self.budgets.default_tokens_per_month == 0 || self.budgets.default_actions_per_hour == 0 {
            return Err(ConfigError::InvalidValue {
                field: "budgets".to_string(),
                message: "budget limits must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    fn validate_outbox(&self) -> Result<(), ConfigError> {
        let o = &self.outbox;
        if o.backoff_base_ms > o.backoff_cap_ms {
            return Err(ConfigError::InvalidValue {
                field: "outbox.backoff_base_ms".to_string(),
                message: "base backoff must not exceed the cap".to_string(),
            });
        }
        if o.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "outbox.max_attempts".to_string(),
                message: "must allow at least one attempt".to_string(),
            });
        }
        Ok(())
    }

    fn validate_persistence(&self) -> Result<(), ConfigError> {
        let p = &self.persistence;
        if p.enabled && p.scylla_hosts.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "persistence.scylla_hosts".to_string(),
                message: "at least one host is required when persistence is enabled".to_string(),
            });
        }
        if self.environment.is_production() && p.replication_factor < 2 {
            return Err(ConfigError::InvalidValue {
                field: "persistence.replication_factor".to_string(),
                message: "production requires a replication factor of at least 2".to_string(),
            });
        }
        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/v1/voice".to_string()
}
fn default_max_connections() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
            cors_enabled: false,
            cors_origins: Vec::new(),
        }
    }
}

fn default_jwt_secret_env() -> String {
    "VOICE_AGENT_JWT_SECRET".to_string()
}
fn default_jwt_issuer() -> String {
    "voice-agent".to_string()
}
fn default_jwt_clock_skew_secs() -> i64 {
    30
}
fn default_audit_ring_capacity() -> usize {
    1000
}

/// C1 Identity & Token Service config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Disabled only makes sense in development; `validate()` rejects it in
    /// staging/production.
    #[serde(default = "default_true")]
    pub jwt_enabled: bool,
    /// Name of the env var holding the verification secret/key, never the
    /// secret value itself.
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,
    #[serde(default = "default_jwt_issuer")]
    pub jwt_issuer: String,
    #[serde(default = "default_jwt_clock_skew_secs")]
    pub jwt_clock_skew_secs: i64,
    /// If set, unauthenticated connections in development are assigned this
    /// tenant instead of being rejected. Must be unset outside development.
    #[serde(default)]
    pub dev_bypass_tenant_id: Option<String>,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default = "default_true")]
    pub pii_redaction_enabled: bool,
    #[serde(default = "default_audit_ring_capacity")]
    pub audit_ring_capacity: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_enabled: true,
            jwt_secret_env: default_jwt_secret_env(),
            jwt_issuer: default_jwt_issuer(),
            jwt_clock_skew_secs: default_jwt_clock_skew_secs(),
            dev_bypass_tenant_id: None,
            rate_limits: RateLimitConfig::default(),
            pii_redaction_enabled: true,
            audit_ring_capacity: default_audit_ring_capacity(),
        }
    }
}

/// Per-scope sliding-minute rate limits, C6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_tenant_per_minute")]
    pub tenant_per_minute: u32,
    #[serde(default = "default_user_per_minute")]
    pub user_per_minute: u32,
    #[serde(default = "default_ip_per_minute")]
    pub ip_per_minute: u32,
    #[serde(default = "default_session_per_minute")]
    pub session_per_minute: u32,
}

fn default_tenant_per_minute() -> u32 {
    crate::constants::rate_limits::TENANT_PER_MINUTE
}
fn default_user_per_minute() -> u32 {
    crate::constants::rate_limits::USER_PER_MINUTE
}
fn default_ip_per_minute() -> u32 {
    crate::constants::rate_limits::IP_PER_MINUTE
}
fn default_session_per_minute() -> u32 {
    crate::constants::rate_limits::SESSION_PER_MINUTE
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tenant_per_minute: default_tenant_per_minute(),
            user_per_minute: default_user_per_minute(),
            ip_per_minute: default_ip_per_minute(),
            session_per_minute: default_session_per_minute(),
        }
    }
}

/// C4 Voice Gateway heartbeat/idle knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_max_missed_pongs")]
    pub max_missed_pongs: u32,
    #[serde(default = "default_idle_close_ms")]
    pub idle_close_ms: u64,
    #[serde(default = "default_ready_deadline_ms")]
    pub ready_deadline_ms: u64,
}

fn default_ping_interval_ms() -> u64 {
    crate::constants::ws::PING_INTERVAL_MS
}
fn default_max_missed_pongs() -> u32 {
    crate::constants::ws::MAX_MISSED_PONGS
}
fn default_idle_close_ms() -> u64 {
    crate::constants::ws::IDLE_CLOSE_MS
}
fn default_ready_deadline_ms() -> u64 {
    crate::constants::ws::READY_DEADLINE_MS
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            max_missed_pongs: default_max_missed_pongs(),
            idle_close_ms: default_idle_close_ms(),
            ready_deadline_ms: default_ready_deadline_ms(),
        }
    }
}

/// C2 Frame Codec defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_jitter_buffer_frames")]
    pub jitter_buffer_frames: usize,
    #[serde(default = "default_vad_energy_floor_db")]
    pub vad_energy_floor_db: f32,
}

fn default_frame_ms() -> u32 {
    crate::constants::audio::FRAME_MS_DEFAULT
}
fn default_max_frame_bytes() -> usize {
    crate::constants::audio::MAX_FRAME_BYTES
}
fn default_jitter_buffer_frames() -> usize {
    crate::constants::audio::JITTER_BUFFER_FRAMES
}
fn default_vad_energy_floor_db() -> f32 {
    crate::constants::audio::VAD_ENERGY_FLOOR_DB
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_ms: default_frame_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            jitter_buffer_frames: default_jitter_buffer_frames(),
            vad_energy_floor_db: default_vad_energy_floor_db(),
        }
    }
}

/// C7 Universal Agent Orchestrator deadlines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_tool_loops")]
    pub max_tool_loops: u32,
    #[serde(default = "default_turn_deadline_ms")]
    pub turn_deadline_ms: u64,
    #[serde(default = "default_intent_deadline_ms")]
    pub intent_deadline_ms: u64,
    #[serde(default = "default_retrieval_deadline_ms")]
    pub retrieval_deadline_ms: u64,
    #[serde(default = "default_planning_deadline_ms")]
    pub planning_deadline_ms: u64,
    #[serde(default = "default_dispatch_deadline_ms")]
    pub dispatch_deadline_ms: u64,
    #[serde(default = "default_barge_in_cancel_deadline_ms")]
    pub barge_in_cancel_deadline_ms: u64,
}

fn default_max_tool_loops() -> u32 {
    crate::constants::orchestrator::MAX_TOOL_LOOPS
}
fn default_turn_deadline_ms() -> u64 {
    crate::constants::orchestrator::TURN_DEADLINE_MS
}
fn default_intent_deadline_ms() -> u64 {
    crate::constants::orchestrator::INTENT_DEADLINE_MS
}
fn default_retrieval_deadline_ms() -> u64 {
    crate::constants::orchestrator::RETRIEVAL_DEADLINE_MS
}
fn default_planning_deadline_ms() -> u64 {
    crate::constants::orchestrator::PLANNING_DEADLINE_MS
}
fn default_dispatch_deadline_ms() -> u64 {
    crate::constants::orchestrator::DISPATCH_DEADLINE_MS
}
fn default_barge_in_cancel_deadline_ms() -> u64 {
    crate::constants::orchestrator::BARGE_IN_CANCEL_DEADLINE_MS
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_loops: default_max_tool_loops(),
            turn_deadline_ms: default_turn_deadline_ms(),
            intent_deadline_ms: default_intent_deadline_ms(),
            retrieval_deadline_ms: default_retrieval_deadline_ms(),
            planning_deadline_ms: default_planning_deadline_ms(),
            dispatch_deadline_ms: default_dispatch_deadline_ms(),
            barge_in_cancel_deadline_ms: default_barge_in_cancel_deadline_ms(),
        }
    }
}

/// C5 retrieval client timeouts (cancellation, not ranking — see `RagConfig`
/// below for fusion tuning).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_soft_timeout_ms")]
    pub soft_timeout_ms: u64,
    #[serde(default = "default_hard_timeout_ms")]
    pub hard_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_soft_timeout_ms() -> u64 {
    crate::constants::rag::SOFT_TIMEOUT_MS
}
fn default_hard_timeout_ms() -> u64 {
    crate::constants::rag::HARD_TIMEOUT_MS
}
fn default_cache_ttl_secs() -> u64 {
    crate::constants::rag::CACHE_TTL_SECS
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            soft_timeout_ms: default_soft_timeout_ms(),
            hard_timeout_ms: default_hard_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_qdrant_endpoint() -> String {
    crate::constants::endpoints::QDRANT_DEFAULT.clone()
}
fn default_qdrant_collection() -> String {
    "knowledge_base".to_string()
}
fn default_vector_dim() -> usize {
    384
}
fn default_dense_top_k() -> usize {
    crate::constants::rag::DEFAULT_TOP_K * 3
}
fn default_sparse_top_k() -> usize {
    crate::constants::rag::DEFAULT_TOP_K * 3
}
fn default_final_top_k() -> usize {
    crate::constants::rag::DEFAULT_TOP_K
}
fn default_dense_weight() -> f64 {
    crate::constants::rag::DENSE_WEIGHT
}
fn default_rrf_k() -> f64 {
    crate::constants::rag::RRF_K
}
fn default_min_score() -> f64 {
    crate::constants::rag::MIN_SCORE
}
fn default_min_consensus() -> usize {
    crate::constants::rag::MIN_CONSENSUS
}
fn default_snippet_max_chars() -> usize {
    crate::constants::rag::SNIPPET_MAX_CHARS
}

/// C5 hybrid retrieval fusion tuning (RRF weighting, top-k, consensus floor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_qdrant_endpoint")]
    pub qdrant_endpoint: String,
    #[serde(default = "default_qdrant_collection")]
    pub qdrant_collection: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
    #[serde(default = "default_dense_top_k")]
    pub dense_top_k: usize,
    #[serde(default = "default_sparse_top_k")]
    pub sparse_top_k: usize,
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Minimum number of strategies (vector/fulltext/structured) that must
    /// surface an item before it's treated as consensus-confirmed.
    #[serde(default = "default_min_consensus")]
    pub min_consensus: usize,
    #[serde(default = "default_snippet_max_chars")]
    pub snippet_max_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            qdrant_endpoint: default_qdrant_endpoint(),
            qdrant_collection: default_qdrant_collection(),
            qdrant_api_key: None,
            vector_dim: default_vector_dim(),
            dense_top_k: default_dense_top_k(),
            sparse_top_k: default_sparse_top_k(),
            final_top_k: default_final_top_k(),
            dense_weight: default_dense_weight(),
            rrf_k: default_rrf_k(),
            min_score: default_min_score(),
            min_consensus: default_min_consensus(),
            snippet_max_chars: default_snippet_max_chars(),
        }
    }
}

/// C9 Resource Budget Service defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetsConfig {
    #[serde(default = "default_tokens_per_month")]
    pub default_tokens_per_month: u64,
    #[serde(default = "default_actions_per_hour")]
    pub default_actions_per_hour: u64,
}

fn default_tokens_per_month() -> u64 {
    crate::constants::budgets::DEFAULT_TOKENS_PER_MONTH
}
fn default_actions_per_hour() -> u64 {
    crate::constants::budgets::DEFAULT_ACTIONS_PER_HOUR
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            default_tokens_per_month: default_tokens_per_month(),
            default_actions_per_hour: default_actions_per_hour(),
        }
    }
}

/// C10 Outbox Publisher tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: i64,
}

fn default_batch_size() -> usize {
    crate::constants::outbox::BATCH_SIZE
}
fn default_backoff_base_ms() -> u64 {
    crate::constants::outbox::BACKOFF_BASE_MS
}
fn default_backoff_cap_ms() -> u64 {
    crate::constants::outbox::BACKOFF_CAP_MS
}
fn default_max_attempts() -> u32 {
    crate::constants::outbox::MAX_ATTEMPTS
}
fn default_stale_after_hours() -> i64 {
    crate::constants::outbox::STALE_AFTER_HOURS
}
fn default_claim_lease_secs() -> i64 {
    crate::constants::outbox::CLAIM_LEASE_SECS
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_attempts: default_max_attempts(),
            stale_after_hours: default_stale_after_hours(),
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

fn default_scylla_hosts() -> Vec<String> {
    std::env::var("SCYLLA_HOSTS")
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:9042".to_string()])
}
fn default_keyspace() -> String {
    std::env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| "voice_agent".to_string())
}
fn default_replication_factor() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_true")]
    pub tracing_enabled: bool,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            tracing_enabled: true,
            otlp_endpoint: None,
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

/// Load layered settings: built-in defaults, `config/base.yaml`,
/// `config/<environment>.yaml`, then `VOICE_AGENT__*` env overrides.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();
    builder = builder.add_source(File::with_name("config/base").required(false));
    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }
    builder = builder.add_source(
        Environment::with_prefix("VOICE_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let built = builder.build()?;
    let mut settings: Settings = built.try_deserialize()?;
    if let Some(env_name) = env {
        settings.environment = env_name.parse()?;
    }
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        settings.validate().expect("defaults must validate");
    }

    #[test]
    fn production_rejects_disabled_jwt() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        settings.security.jwt_enabled = false;
        settings.persistence.replication_factor = 3;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn production_rejects_dev_bypass_tenant() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        settings.security.dev_bypass_tenant_id = Some("tenant-1".to_string());
        settings.persistence.replication_factor = 3;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn production_requires_replication() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_bad_frame_ms() {
        let mut settings = Settings::default();
        settings.audio.frame_ms = 25;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_inverted_retrieval_timeouts() {
        let mut settings = Settings::default();
        settings.retrieval.soft_timeout_ms = 2000;
        settings.retrieval.hard_timeout_ms = 1000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_rate_limit() {
        let mut settings = Settings::default();
        settings.security.rate_limits.session_per_minute = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rag_validation_dense_weight() {
        let mut settings = Settings::default();
        settings.rag.dense_weight = 1.5;
        assert!(settings.validate().is_err());
        settings.rag.dense_weight = -0.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rag_validation_top_k() {
        let mut settings = Settings::default();
        settings.rag.final_top_k = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn outbox_backoff_must_not_invert() {
        let mut settings = Settings::default();
        settings.outbox.backoff_base_ms = 50_000;
        settings.outbox.backoff_cap_ms = 30_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("prod".parse::<RuntimeEnvironment>().unwrap(), RuntimeEnvironment::Production);
        assert_eq!("dev".parse::<RuntimeEnvironment>().unwrap(), RuntimeEnvironment::Development);
        assert!("nonsense".parse::<RuntimeEnvironment>().is_err());
    }
}
