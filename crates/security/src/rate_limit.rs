//! C6 per-scope rate limiting: tenant, user, ip and session all have
//! independent sliding-minute budgets; a request is rejected if it would
//! exceed any one of them.

use dashmap::DashMap;
use voice_agent_config::RateLimitConfig;
use voice_agent_core::RateLimitBucket;

use crate::error::{Result, SecurityError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    Tenant,
    User,
    Ip,
    Session,
}

impl RateLimitScope {
    fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::Tenant => "tenant",
            RateLimitScope::User => "user",
            RateLimitScope::Ip => "ip",
            RateLimitScope::Session => "session",
        }
    }
}

/// Holds one minute-aligned bucket per `(scope, key)` pair. Shared across
/// connections via `Arc`; safe under concurrent access via `DashMap`.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<(RateLimitScope, String), RateLimitBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: DashMap::new() }
    }

    fn limit_for(&self, scope: RateLimitScope) -> u32 {
        match scope {
            RateLimitScope::Tenant => self.config.tenant_per_minute,
            RateLimitScope::User => self.config.user_per_minute,
            RateLimitScope::Ip => self.config.ip_per_minute,
            RateLimitScope::Session => self.config.session_per_minute,
        }
    }

    /// Increments the bucket for `(scope, key)` and rejects if the scope's
    /// configured per-minute limit would be exceeded.
    pub fn check_and_increment(&self, scope: RateLimitScope, key: &str) -> Result<()> {
        let limit = self.limit_for(scope);
        let now = chrono::Utc::now();
        let mut entry = self
            .buckets
            .entry((scope, key.to_string()))
            .or_insert_with(|| RateLimitBucket::new_minute_aligned(key.to_string(), now));
        entry.increment(now);
        if entry.is_exceeded(limit) {
            return Err(SecurityError::RateLimited { scope: scope.as_str().to_string(), key: key.to_string() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit() {
        let mut cfg = RateLimitConfig {
            tenant_per_minute: 1000,
            user_per_minute: 100,
            ip_per_minute: 50,
            session_per_minute: 3,
        };
        cfg.session_per_minute = 3;
        let limiter = RateLimiter::new(cfg);
        for _ in 0..3 {
            limiter.check_and_increment(RateLimitScope::Session, "sess-1").unwrap();
        }
        assert!(limiter.check_and_increment(RateLimitScope::Session, "sess-1").is_err());
    }

    #[test]
    fn scopes_are_independent() {
        let cfg = RateLimitConfig { tenant_per_minute: 1000, user_per_minute: 100, ip_per_minute: 50, session_per_minute: 1 };
        let limiter = RateLimiter::new(cfg);
        limiter.check_and_increment(RateLimitScope::Session, "sess-1").unwrap();
        assert!(limiter.check_and_increment(RateLimitScope::Session, "sess-1").is_err());
        // a different scope/key is unaffected
        limiter.check_and_increment(RateLimitScope::Tenant, "tenant-a").unwrap();
    }
}
