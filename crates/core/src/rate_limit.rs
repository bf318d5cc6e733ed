//! `RateLimitBucket`: minute-aligned, atomically incremented. The bucket
//! shape lives here so the security crate and any diagnostic/admin surface
//! can agree on it without a dependency cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub key: String,
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitBucket {
    pub fn new_minute_aligned(key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            count: 0,
            reset_at: Self::next_minute_boundary(now),
        }
    }

    fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
        let truncated = now
            .date_naive()
            .and_hms_opt(now.hour(), now.minute(), 0)
            .unwrap();
        DateTime::<Utc>::from_naive_utc_and_offset(truncated, Utc) + chrono::Duration::minutes(1)
    }

    /// Roll the bucket over if `now` has passed `reset_at`, then increment.
    /// Returns the post-increment count.
    pub fn increment(&mut self, now: DateTime<Utc>) -> u32 {
        if now >= self.reset_at {
            self.count = 0;
            self.reset_at = Self::next_minute_boundary(now);
        }
        self.count += 1;
        self.count
    }

    pub fn is_exceeded(&self, limit: u32) -> bool {
        self.count > limit
    }
}

use chrono::Timelike;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_rolls_over_after_reset() {
        let now = Utc::now();
        let mut bucket = RateLimitBucket::new_minute_aligned("tenant:1", now);
        for _ in 0..5 {
            bucket.increment(now);
        }
        assert_eq!(bucket.count, 5);

        let later = bucket.reset_at + chrono::Duration::seconds(1);
        bucket.increment(later);
        assert_eq!(bucket.count, 1);
    }

    #[test]
    fn exceeded_only_past_limit() {
        let now = Utc::now();
        let mut bucket = RateLimitBucket::new_minute_aligned("session:1", now);
        for _ in 0..30 {
            bucket.increment(now);
        }
        assert!(!bucket.is_exceeded(30));
        bucket.increment(now);
        assert!(bucket.is_exceeded(30));
    }
}
