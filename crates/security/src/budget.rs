//! C9 Resource Budget Service.
//!
//! Every tenant has a monthly token budget and an hourly action budget.
//! The orchestrator reserves against the relevant budget before an
//! expensive step (an LLM call, a side-effecting tool dispatch), then
//! either commits the reservation on success or refunds it on failure —
//! so a turn that errors out never leaves the tenant's remaining budget
//! permanently short.

use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use voice_agent_config::BudgetsConfig;
use voice_agent_core::{BudgetLedgerRow, ResourceType};

use crate::error::{Result, SecurityError};

fn window_start(resource_type: ResourceType, now: DateTime<Utc>) -> DateTime<Utc> {
    match resource_type {
        ResourceType::Tokens => {
            let truncated = now.date_naive().with_day(1).unwrap().and_hms_opt(0, 0, 0).unwrap();
            DateTime::<Utc>::from_naive_utc_and_offset(truncated, Utc)
        }
        ResourceType::Actions => {
            let truncated = now.date_naive().and_hms_opt(now.hour(), 0, 0).unwrap();
            DateTime::<Utc>::from_naive_utc_and_offset(truncated, Utc)
        }
    }
}

/// An outstanding reservation token, returned by `reserve` and consumed by
/// exactly one of `commit`/`refund`.
pub struct Reservation {
    tenant_id: String,
    resource_type: ResourceType,
    amount: u64,
}

pub struct BudgetService {
    config: BudgetsConfig,
    ledger: DashMap<(String, ResourceType), BudgetLedgerRow>,
}

impl BudgetService {
    pub fn new(config: BudgetsConfig) -> Self {
        Self { config, ledger: DashMap::new() }
    }

    fn limit_for(&self, resource_type: ResourceType) -> u64 {
        match resource_type {
            ResourceType::Tokens => self.config.default_tokens_per_month,
            ResourceType::Actions => self.config.default_actions_per_hour,
        }
    }

    pub fn reserve(&self, tenant_id: &str, resource_type: ResourceType, amount: u64) -> Result<Reservation> {
        let now = Utc::now();
        let start = window_start(resource_type, now);
        let limit = self.limit_for(resource_type);
        let mut row = self
            .ledger
            .entry((tenant_id.to_string(), resource_type))
            .or_insert_with(|| BudgetLedgerRow::new(tenant_id.to_string(), resource_type, start, limit));

        if row.window_start != start {
            row.window_start = start;
            row.reserved = 0;
            row.committed = 0;
        }

        if !row.can_reserve(amount) {
            return Err(SecurityError::BudgetExceeded {
                tenant_id: tenant_id.to_string(),
                resource: resource_type.as_str().to_string(),
            });
        }
        row.reserved += amount;
        Ok(Reservation { tenant_id: tenant_id.to_string(), resource_type, amount })
    }

    pub fn commit(&self, reservation: Reservation) {
        if let Some(mut row) = self.ledger.get_mut(&(reservation.tenant_id.clone(), reservation.resource_type)) {
            row.reserved = row.reserved.saturating_sub(reservation.amount);
            row.committed += reservation.amount;
        }
    }

    pub fn refund(&self, reservation: Reservation) {
        if let Some(mut row) = self.ledger.get_mut(&(reservation.tenant_id.clone(), reservation.resource_type)) {
            row.reserved = row.reserved.saturating_sub(reservation.amount);
        }
    }

    pub fn remaining(&self, tenant_id: &str, resource_type: ResourceType) -> u64 {
        self.ledger
            .get(&(tenant_id.to_string(), resource_type))
            .map(|row| row.remaining())
            .unwrap_or_else(|| self.limit_for(resource_type))
    }

    /// `checkAvailability -> {allowed, budget, remaining, resetAt}`, read-only
    /// (does not reserve).
    pub fn check_availability(&self, tenant_id: &str, resource_type: ResourceType, amount: u64) -> Availability {
        let now = Utc::now();
        let limit = self.limit_for(resource_type);
        let remaining = self.remaining(tenant_id, resource_type);
        let reset_at = match self.ledger.get(&(tenant_id.to_string(), resource_type)) {
            Some(row) => window_end(resource_type, row.window_start),
            None => window_end(resource_type, window_start(resource_type, now)),
        };
        Availability { allowed: amount <= remaining, budget: limit, remaining, reset_at }
    }
}

#[derive(Debug, Clone)]
pub struct Availability {
    pub allowed: bool,
    pub budget: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

fn window_end(resource_type: ResourceType, start: DateTime<Utc>) -> DateTime<Utc> {
    match resource_type {
        ResourceType::Tokens => {
            let next_month = if start.month() == 12 {
                start.with_year(start.year() + 1).unwrap().with_month(1).unwrap()
            } else {
                start.with_month(start.month() + 1).unwrap()
            };
            next_month
        }
        ResourceType::Actions => start + chrono::Duration::hours(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> BudgetService {
        BudgetService::new(BudgetsConfig { default_tokens_per_month: 1000, default_actions_per_hour: 10 })
    }

    #[test]
    fn reserve_then_commit_leaves_spend_accounted() {
        let svc = service();
        let r = svc.reserve("tenant-a", ResourceType::Tokens, 200).unwrap();
        assert_eq!(svc.remaining("tenant-a", ResourceType::Tokens), 800);
        svc.commit(r);
        assert_eq!(svc.remaining("tenant-a", ResourceType::Tokens), 800);
    }

    #[test]
    fn reserve_then_refund_restores_remaining() {
        let svc = service();
        let r = svc.reserve("tenant-a", ResourceType::Actions, 5).unwrap();
        assert_eq!(svc.remaining("tenant-a", ResourceType::Actions), 5);
        svc.refund(r);
        assert_eq!(svc.remaining("tenant-a", ResourceType::Actions), 10);
    }

    #[test]
    fn reservation_beyond_limit_is_rejected() {
        let svc = service();
        assert!(svc.reserve("tenant-a", ResourceType::Actions, 11).is_err());
    }

    #[test]
    fn tenants_are_isolated() {
        let svc = service();
        svc.reserve("tenant-a", ResourceType::Tokens, 900).unwrap();
        assert_eq!(svc.remaining("tenant-b", ResourceType::Tokens), 1000);
    }
}
