//! C6 Security & Privacy Guards: the public `validate`/`compliance` surface.
//!
//! `validate` is the single entry point `validateSecurity` (the orchestrator's
//! first node) and the WS upgrade path call before anything else runs: origin
//! check, rate limiting, and injection-defense scanning, folded into one
//! `allowed`/`riskLevel`/`issues` verdict so callers don't have to stitch
//! three separate checks together.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use voice_agent_config::{RuntimeEnvironment, SecurityConfig};

use crate::rate_limit::{RateLimitScope, RateLimiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub code: String,
    pub message: String,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone)]
pub struct ValidateRequest<'a> {
    pub origin: Option<&'a str>,
    pub tenant_id: &'a str,
    pub user_id: Option<&'a str>,
    pub ip: &'a str,
    pub session_id: &'a str,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub reset_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResult {
    pub allowed: bool,
    pub risk_level: RiskLevel,
    pub issues: Vec<Issue>,
    /// `request.parameters` with every substring matching an injection
    /// pattern replaced by `[REDACTED]`; `None` if nothing matched. Populated
    /// regardless of `allowed` — today every injection match is `high` risk
    /// and blocks the request on its own, but a caller logging or forwarding
    /// `sanitized_parameters` shouldn't have to know that.
    pub sanitized_parameters: Option<serde_json::Value>,
    pub rate_limit: Option<RateLimitStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceOp {
    Store,
    Process,
    Export,
    RightToErasure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub compliant: bool,
    pub violations: Vec<String>,
}

struct InjectionFamily {
    name: &'static str,
    regex: &'static Lazy<Regex>,
}

static SQLI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\bunion\s+select\b|\bor\s+1\s*=\s*1\b|;\s*drop\s+table\b|--\s*$|'\s*or\s*'1'\s*=\s*'1)").unwrap()
});
static XSS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(<script[^>]*>|javascript:|onerror\s*=|onload\s*=|<iframe)").unwrap()
});
static PATH_TRAVERSAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\.\./|\.\.\\|%2e%2e%2f)").unwrap());
static CMD_INJECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(;\s*rm\s+-rf|\$\([^)]*\)|`[^`]*`|\|\s*sh\b|&&\s*curl\b)").unwrap());

static INJECTION_FAMILIES: Lazy<Vec<InjectionFamily>> = Lazy::new(|| {
    vec![
        InjectionFamily { name: "sqli", regex: &SQLI_RE },
        InjectionFamily { name: "xss", regex: &XSS_RE },
        InjectionFamily { name: "path_traversal", regex: &PATH_TRAVERSAL_RE },
        InjectionFamily { name: "command_injection", regex: &CMD_INJECTION_RE },
    ]
});

/// Any match against an injection family is an error-class, `high`-risk block.
fn scan_injection(text: &str) -> Vec<Issue> {
    INJECTION_FAMILIES
        .iter()
        .filter(|family| family.regex.is_match(text))
        .map(|family| Issue {
            code: format!("UNSAFE_INPUT_{}", family.name.to_uppercase()),
            message: format!("input matched {} pattern", family.name),
            risk_level: RiskLevel::High,
        })
        .collect()
}

/// Replaces every substring of `text` matching an injection family pattern
/// with `[REDACTED]`.
fn redact_injections(text: &str) -> String {
    let mut result = std::borrow::Cow::Borrowed(text);
    for family in INJECTION_FAMILIES.iter() {
        if family.regex.is_match(&result) {
            result = std::borrow::Cow::Owned(family.regex.replace_all(&result, "[REDACTED]").into_owned());
        }
    }
    result.into_owned()
}

/// Walks `value` redacting any string whose content matched an injection
/// pattern. Returns `None` if nothing needed redaction, so callers can tell
/// an untouched request apart from a sanitized one.
fn redact_parameters(value: &serde_json::Value) -> Option<serde_json::Value> {
    fn walk(value: &serde_json::Value, changed: &mut bool) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => {
                let redacted = redact_injections(s);
                if redacted != *s {
                    *changed = true;
                }
                serde_json::Value::String(redacted)
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(|v| walk(v, changed)).collect()),
            serde_json::Value::Object(map) => {
                serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), walk(v, changed))).collect())
            }
            other => other.clone(),
        }
    }
    let mut changed = false;
    let redacted = walk(value, &mut changed);
    changed.then_some(redacted)
}

fn collect_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

pub struct SecurityGuards {
    config: SecurityConfig,
    environment: RuntimeEnvironment,
    cors_origins: Vec<String>,
    rate_limiter: RateLimiter,
}

impl SecurityGuards {
    pub fn new(
        config: SecurityConfig,
        environment: RuntimeEnvironment,
        cors_origins: Vec<String>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limits.clone());
        Self { config, environment, cors_origins, rate_limiter }
    }

    /// Origin check: `localhost` is always allowed in development; any other
    /// origin must be an HTTPS origin on the configured allow-list.
    pub fn check_origin(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return !self.environment.is_strict();
        };
        if !self.environment.is_strict()
            && (origin.starts_with("http://localhost") || origin.starts_with("http://127.0.0.1"))
        {
            return true;
        }
        origin.starts_with("https://") && self.cors_origins.iter().any(|allowed| allowed == origin)
    }

    /// `validate(request) -> {allowed, riskLevel, issues, sanitizedParameters?, rateLimit}`
    pub fn validate(&self, request: &ValidateRequest<'_>) -> ValidateResult {
        let mut issues = Vec::new();

        if !self.check_origin(request.origin) {
            issues.push(Issue {
                code: "ORIGIN_REJECTED".to_string(),
                message: format!("origin {:?} is not allow-listed", request.origin),
                risk_level: RiskLevel::High,
            });
        }

        let rate_limit = self.check_rate_limits(request, &mut issues);

        let mut strings = Vec::new();
        collect_strings(&request.parameters, &mut strings);
        for s in &strings {
            issues.extend(scan_injection(s));
        }

        let risk_level = issues.iter().map(|i| i.risk_level).max().unwrap_or(RiskLevel::Low);
        let allowed = !issues.iter().any(|i| i.risk_level == RiskLevel::High);

        ValidateResult {
            allowed,
            risk_level,
            issues,
            sanitized_parameters: redact_parameters(&request.parameters),
            rate_limit,
        }
    }

    fn check_rate_limits(&self, request: &ValidateRequest<'_>, issues: &mut Vec<Issue>) -> Option<RateLimitStatus> {
        let checks = [
            (RateLimitScope::Tenant, request.tenant_id),
            (RateLimitScope::Ip, request.ip),
            (RateLimitScope::Session, request.session_id),
        ];
        let mut worst: Option<RateLimitStatus> = None;
        for (scope, key) in checks {
            if let Err(err) = self.rate_limiter.check_and_increment(scope, key) {
                issues.push(Issue {
                    code: "RATE_LIMIT_EXCEEDED".to_string(),
                    message: err.to_string(),
                    risk_level: RiskLevel::Medium,
                });
                worst = Some(RateLimitStatus {
                    remaining: 0,
                    reset_at: chrono::Utc::now() + chrono::Duration::seconds(60),
                });
            }
        }
        if let Some(user_id) = request.user_id {
            if let Err(err) = self.rate_limiter.check_and_increment(RateLimitScope::User, user_id) {
                issues.push(Issue {
                    code: "RATE_LIMIT_EXCEEDED".to_string(),
                    message: err.to_string(),
                    risk_level: RiskLevel::Medium,
                });
                worst = Some(RateLimitStatus {
                    remaining: 0,
                    reset_at: chrono::Utc::now() + chrono::Duration::seconds(60),
                });
            }
        }
        worst
    }

    /// `compliance(op, dataType, consent?) -> {compliant, violations[]}`. A
    /// right-to-erasure request is always compliant (it's the mechanism by
    /// which compliance is restored); storing/processing/exporting PII
    /// without recorded consent is a violation.
    pub fn compliance(&self, op: ComplianceOp, data_type: &str, consent: bool) -> ComplianceResult {
        if op == ComplianceOp::RightToErasure {
            return ComplianceResult { compliant: true, violations: Vec::new() };
        }
        let is_pii = matches!(data_type, "email" | "phone" | "ssn" | "credit_card" | "location");
        if is_pii && !consent && !self.config.pii_redaction_enabled {
            return ComplianceResult {
                compliant: false,
                violations: vec![format!("{op:?} of {data_type} requires consent or redaction")],
            };
        }
        ComplianceResult { compliant: true, violations: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guards(env: RuntimeEnvironment) -> SecurityGuards {
        SecurityGuards::new(
            SecurityConfig::default(),
            env,
            vec!["https://widget.example.com".to_string()],
        )
    }

    #[test]
    fn localhost_allowed_only_outside_strict_environments() {
        let dev = guards(RuntimeEnvironment::Development);
        assert!(dev.check_origin(Some("http://localhost:3000")));
        let prod = guards(RuntimeEnvironment::Production);
        assert!(!prod.check_origin(Some("http://localhost:3000")));
    }

    #[test]
    fn allow_listed_https_origin_passes_in_production() {
        let prod = guards(RuntimeEnvironment::Production);
        assert!(prod.check_origin(Some("https://widget.example.com")));
        assert!(!prod.check_origin(Some("https://evil.example.com")));
    }

    #[test]
    fn sqli_in_parameters_blocks_with_high_risk() {
        let guard = guards(RuntimeEnvironment::Development);
        let req = ValidateRequest {
            origin: Some("http://localhost:3000"),
            tenant_id: "tenant-a",
            user_id: None,
            ip: "127.0.0.1",
            session_id: "sess-1",
            parameters: serde_json::json!({"q": "'; DROP TABLE users; --"}),
        };
        let result = guard.validate(&req);
        assert!(!result.allowed);
        assert_eq!(result.risk_level, RiskLevel::High);
        let sanitized = result.sanitized_parameters.unwrap();
        let sanitized_q = sanitized["q"].as_str().unwrap();
        assert!(sanitized_q.contains("[REDACTED]"));
        assert!(!sanitized_q.contains("DROP TABLE"));
    }

    #[test]
    fn clean_request_has_no_sanitized_parameters() {
        let guard = guards(RuntimeEnvironment::Development);
        let req = ValidateRequest {
            origin: Some("http://localhost:3000"),
            tenant_id: "tenant-a",
            user_id: None,
            ip: "127.0.0.1",
            session_id: "sess-3",
            parameters: serde_json::json!({"q": "what time do you open"}),
        };
        let result = guard.validate(&req);
        assert!(result.sanitized_parameters.is_none());
    }

    #[test]
    fn clean_request_is_allowed() {
        let guard = guards(RuntimeEnvironment::Development);
        let req = ValidateRequest {
            origin: Some("http://localhost:3000"),
            tenant_id: "tenant-a",
            user_id: None,
            ip: "127.0.0.1",
            session_id: "sess-2",
            parameters: serde_json::json!({"q": "what are your opening hours?"}),
        };
        let result = guard.validate(&req);
        assert!(result.allowed);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn right_to_erasure_is_always_compliant() {
        let guard = guards(RuntimeEnvironment::Development);
        let result = guard.compliance(ComplianceOp::RightToErasure, "email", false);
        assert!(result.compliant);
    }
}
