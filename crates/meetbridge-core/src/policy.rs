//! Exponential backoff for retry entries.

use chrono::{DateTime, Duration, Utc};

use crate::config::RetryConfig;

/// Bounded exponential backoff: `base × 2^(attempt-1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// A failure that brings the attempt count to this value is terminal.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::seconds(config.base_delay_secs as i64),
            Duration::seconds(config.max_delay_secs as i64),
        )
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62);
        let factor = 1i64 << exponent;
        let delay_ms = self
            .base_delay
            .num_milliseconds()
            .saturating_mul(factor)
            .min(self.max_delay.num_milliseconds());
        Duration::milliseconds(delay_ms)
    }

    /// When a target that just failed its `attempt`-th time becomes eligible again.
    pub fn next_eligible(&self, now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        now + self.delay_for(attempt)
    }

    /// Whether the failure that produced `attempt` used up the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::seconds(30), Duration::seconds(300))
    }

    #[test]
    fn test_exponential_then_capped() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::seconds(30));
        assert_eq!(p.delay_for(2), Duration::seconds(60));
        assert_eq!(p.delay_for(3), Duration::seconds(120));
        assert_eq!(p.delay_for(4), Duration::seconds(240));
        assert_eq!(p.delay_for(5), Duration::seconds(300));
        assert_eq!(p.delay_for(40), Duration::seconds(300));
        assert_eq!(p.delay_for(u32::MAX), Duration::seconds(300));
    }

    #[test]
    fn test_next_eligible_strictly_increases_along_history() {
        // Each retry happens no earlier than the previous next-eligible time.
        let p = policy();
        let mut now = Utc::now();
        let mut previous = None;
        for attempt in 1..=12 {
            let next = p.next_eligible(now, attempt);
            assert!(p.delay_for(attempt) <= p.max_delay);
            if let Some(prev) = previous {
                assert!(next > prev, "attempt {attempt} did not move forward");
            }
            previous = Some(next);
            now = next;
        }
    }

    #[test]
    fn test_exhaustion() {
        let p = policy();
        assert!(!p.is_exhausted(4));
        assert!(p.is_exhausted(5));
        assert!(p.is_exhausted(6));
    }

    #[test]
    fn test_max_never_below_base() {
        let p = RetryPolicy::new(0, Duration::seconds(60), Duration::seconds(10));
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.max_delay, Duration::seconds(60));
    }
}
