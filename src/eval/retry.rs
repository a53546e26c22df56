use std::time::Duration;

use rand::Rng;

/// Bounded retry with exponential backoff and jitter.
///
/// One policy instance covers every model call in the service; callers
/// classify errors as retryable or terminal via `LlmError::is_retryable`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

const JITTER_MIN_MS: u64 = 500;
const JITTER_MAX_MS: u64 = 1500;

impl RetryPolicy {
    pub const fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`
    /// plus 0.5-1.5 s of jitter. The RNG is created and dropped here so the
    /// returned duration can cross an await point freely.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(16) as u32;
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << exponent);
        let jitter_ms = rand::thread_rng().gen_range(JITTER_MIN_MS..=JITTER_MAX_MS);
        Duration::from_millis(delay_ms.saturating_add(jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt_within_jitter_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));

        for (attempt, expected_base_ms) in [(0u64, 2000u64), (1, 4000), (2, 8000)] {
            let delay = policy.backoff_delay(attempt as usize).as_millis() as u64;
            assert!(delay >= expected_base_ms + JITTER_MIN_MS);
            assert!(delay <= expected_base_ms + JITTER_MAX_MS);
        }
    }

    #[test]
    fn extreme_attempts_do_not_overflow() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        let delay = policy.backoff_delay(usize::MAX);
        assert!(delay >= Duration::from_secs(2));
    }
}
