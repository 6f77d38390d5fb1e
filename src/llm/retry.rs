//! Rate-limit backoff policy for the cloud backend
//!
//! Only rate-limit errors are retried. The first wait honours a
//! server-suggested delay when the error carries one; later waits grow
//! exponentially. Every wait is jittered and floored.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// First wait when the server suggests nothing
    pub default_first_delay: Duration,
    /// Uniform jitter applied to every wait, in both directions
    pub jitter: Duration,
    /// No wait is ever shorter than this
    pub min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_first_delay: Duration::from_millis(2000),
            jitter: Duration::from_millis(500),
            min_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Wait before retrying after failed attempt number `attempt` (1-based)
    pub fn delay_for<R: Rng>(
        &self,
        attempt: u32,
        suggested: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        let base_ms = self.base_delay(attempt, suggested).as_millis() as i64;
        let jitter_ms = self.jitter.as_millis() as i64;
        let offset = if jitter_ms > 0 {
            rng.gen_range(-jitter_ms..=jitter_ms)
        } else {
            0
        };
        let floor_ms = self.min_delay.as_millis() as i64;
        Duration::from_millis((base_ms + offset).max(floor_ms) as u64)
    }

    /// Un-jittered wait for `attempt`
    pub fn base_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if attempt <= 1 {
            suggested.unwrap_or(self.default_first_delay)
        } else {
            // 2^attempt seconds; capped shift keeps absurd attempt counts from overflowing
            Duration::from_millis((1u64 << attempt.min(20)) * 1000)
        }
    }

    /// Whether another attempt is allowed after `attempt` failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_base_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(1, None), Duration::from_millis(2000));
        assert_eq!(policy.base_delay(1, Some(Duration::from_secs(27))), Duration::from_secs(27));
        // Suggestions only apply to the first wait
        assert_eq!(policy.base_delay(2, Some(Duration::from_secs(27))), Duration::from_secs(4));
        assert_eq!(policy.base_delay(3, None), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_within_half_second() {
        let policy = RetryPolicy::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..500 {
            let first = policy.delay_for(1, Some(Duration::from_secs(2)), &mut rng);
            assert!(first >= Duration::from_millis(1500) && first <= Duration::from_millis(2500));
            let second = policy.delay_for(2, None, &mut rng);
            assert!(second >= Duration::from_millis(3500) && second <= Duration::from_millis(4500));
        }
    }

    #[test]
    fn test_floor_applies_to_tiny_suggestions() {
        let policy = RetryPolicy::default();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..200 {
            let wait = policy.delay_for(1, Some(Duration::from_millis(100)), &mut rng);
            assert!(wait >= Duration::from_millis(500));
            assert!(wait <= Duration::from_millis(600));
        }
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
