//! `OutboxRecord`: owned by the database; a claimant lease is asserted via a
//! conditional status update. Shared between `voice-agent-persistence`
//! (storage) and `voice-agent-outbox` (publishing) so neither needs to depend
//! on the other to talk about a row's shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Publishing,
    Published,
    Failed,
    DeadLetter,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Publishing => "publishing",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::DeadLetter)
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "publishing" => Ok(OutboxStatus::Publishing),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            "dead_letter" => Ok(OutboxStatus::DeadLetter),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// One row of the transactional outbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub aggregate: String,
    pub aggregate_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Gates re-claiming: a `pending` row with this set in the future is not
    /// eligible for `claim_batch` yet, even though its status already reads
    /// `pending`. `None` means eligible immediately (never failed, or a fresh
    /// append).
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    pub status: OutboxStatus,
}

pub fn default_max_attempts() -> u32 {
    5
}

impl OutboxRecord {
    pub fn new(
        tenant_id: impl Into<String>,
        aggregate: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            aggregate: aggregate.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            correlation_id,
            created_at: Utc::now(),
            published_at: None,
            attempts: 0,
            max_attempts: default_max_attempts(),
            last_attempt_at: None,
            next_attempt_at: None,
            error: None,
            status: OutboxStatus::Pending,
        }
    }

    /// Backoff delay before the next retry, per `min(1000 * 2^attempts, 30000)ms`
    pub fn backoff_delay_ms(&self, base_ms: u64, cap_ms: u64) -> u64 {
        let exp = base_ms.saturating_mul(1u64 << self.attempts.min(20));
        exp.min(cap_ms)
    }

    pub fn is_consistent(&self) -> bool {
        if self.attempts > self.max_attempts {
            return false;
        }
        if self.status == OutboxStatus::Published && self.published_at.is_none() {
            return false;
        }
        if self.status == OutboxStatus::DeadLetter && self.attempts < self.max_attempts {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OutboxRecord {
        OutboxRecord::new("tenant-1", "cart", "cart-1", "cart.item_added", serde_json::json!({}), None)
    }

    #[test]
    fn backoff_grows_exponentially_then_caps() {
        let mut rec = sample();
        rec.attempts = 0;
        assert_eq!(rec.backoff_delay_ms(1000, 30000), 1000);
        rec.attempts = 1;
        assert_eq!(rec.backoff_delay_ms(1000, 30000), 2000);
        rec.attempts = 2;
        assert_eq!(rec.backoff_delay_ms(1000, 30000), 4000);
        rec.attempts = 10;
        assert_eq!(rec.backoff_delay_ms(1000, 30000), 30000);
    }

    #[test]
    fn published_without_timestamp_is_inconsistent() {
        let mut rec = sample();
        rec.status = OutboxStatus::Published;
        assert!(!rec.is_consistent());
        rec.published_at = Some(Utc::now());
        assert!(rec.is_consistent());
    }

    #[test]
    fn dead_letter_requires_exhausted_attempts() {
        let mut rec = sample();
        rec.status = OutboxStatus::DeadLetter;
        rec.attempts = 1;
        assert!(!rec.is_consistent());
        rec.attempts = rec.max_attempts;
        assert!(rec.is_consistent());
    }
}
