use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff for transient dispatch failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(900),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many attempts were already
    /// made. `None` once the budget is spent.
    pub fn next_delay(&self, attempts_made: i32) -> Option<Duration> {
        if attempts_made >= self.max_attempts {
            return None;
        }

        let exponent = attempts_made.saturating_sub(1).clamp(0, 16) as u32;
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);

        // Up to 20% jitter keeps a burst of failures from retrying in step.
        let jitter = rand::thread_rng().gen_range(0.0..0.2);
        Some(backoff.mul_f64(1.0 + jitter).min(self.max_delay))
    }

    /// Wall-clock time of the next attempt, or `None` when the order should
    /// be failed terminally.
    pub fn next_attempt_at(&self, attempts_made: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_delay(attempts_made).map(|delay| {
            now + ChronoDuration::milliseconds(delay.as_millis() as i64)
        })
    }

    /// Flat cadence used to poll accepted orders for delivery confirmation.
    /// Not subject to the attempt budget.
    pub fn poll_interval(&self) -> Duration {
        self.base_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_delay_grows_and_stays_capped() {
        let policy = policy();
        let first = policy.next_delay(1).unwrap();
        assert!(first >= Duration::from_secs(10));
        assert!(first <= Duration::from_secs(12));

        let second = policy.next_delay(2).unwrap();
        assert!(second >= Duration::from_secs(20));
        assert!(second <= Duration::from_secs(24));

        // Far past the doubling range the cap holds.
        let capped = RetryPolicy {
            max_attempts: 40,
            ..policy
        };
        assert!(capped.next_delay(30).unwrap() <= Duration::from_secs(60));
    }

    #[test]
    fn test_budget_is_finite() {
        let policy = policy();
        assert!(policy.next_delay(3).is_none());
        assert!(policy.next_attempt_at(3, Utc::now()).is_none());
    }

    #[test]
    fn test_first_attempt_uses_base_delay() {
        // attempts_made == 0 happens when an unknown order is re-armed before
        // any transient failure was counted.
        let policy = policy();
        let delay = policy.next_delay(0).unwrap();
        assert!(delay >= Duration::from_secs(10));
        assert!(delay <= Duration::from_secs(12));
    }
}
