//! `BudgetLedgerRow`: the durable shape behind the resource budget service
//! (C9). Reservations are optimistic: reserved on entry to a node, then
//! either committed on success or refunded on failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Tokens,
    Actions,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Tokens => "tokens",
            ResourceType::Actions => "actions",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetLedgerRow {
    pub tenant_id: String,
    pub resource_type: ResourceType,
    pub window_start: DateTime<Utc>,
    pub reserved: u64,
    pub committed: u64,
    pub limit: u64,
}

impl BudgetLedgerRow {
    pub fn new(tenant_id: impl Into<String>, resource_type: ResourceType, window_start: DateTime<Utc>, limit: u64) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_type,
            window_start,
            reserved: 0,
            committed: 0,
            limit,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.committed + self.reserved)
    }

    pub fn can_reserve(&self, amount: u64) -> bool {
        self.committed + self.reserved + amount <= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_commit_refund_arithmetic() {
        let mut row = BudgetLedgerRow::new("t1", ResourceType::Tokens, Utc::now(), 1000);
        assert!(row.can_reserve(200));
        row.reserved += 200;
        assert_eq!(row.remaining(), 800);

        // commit
        row.reserved -= 200;
        row.committed += 200;
        assert_eq!(row.remaining(), 800);

        // a second reservation that gets refunded restores remaining exactly
        row.reserved += 100;
        assert_eq!(row.remaining(), 700);
        row.reserved -= 100;
        assert_eq!(row.remaining(), 800);
    }
}
