use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap and downward jitter. Only transient
/// failures go through this; validation failures are permanent and never
/// re-enter the queue.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based, matching the task's
    /// retry counter after a failure): `base * 2^(attempt-1)`, capped,
    /// minus up to 25% jitter so synchronized failures spread out.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let capped = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);
        let jitter_ms = capped.as_millis() as u64 / 4;
        if jitter_ms == 0 {
            return capped;
        }
        capped - Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_within_jitter_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(10));
        for (attempt, expected_ms) in [(1u32, 100u64), (2, 200), (3, 400), (4, 800)] {
            let d = policy.delay(attempt).as_millis() as u64;
            assert!(d <= expected_ms, "attempt {attempt}: {d} > {expected_ms}");
            assert!(d >= expected_ms - expected_ms / 4, "attempt {attempt}: {d} too low");
        }
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(500), Duration::from_secs(2));
        for attempt in 1..=10 {
            assert!(policy.delay(attempt) <= Duration::from_secs(2));
        }
    }
}
