//! Retry delay scheduling and retryability classification.

use std::time::Duration;

use rand::Rng;
use uplink_protocol::{RetryStrategy, UploadConfig};

use crate::UploadError;

/// Delay policy applied between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub strategy: RetryStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the
    /// computed delay. `0.0` disables jitter.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(strategy: RetryStrategy, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            strategy: config.retry_delay_strategy,
            base_delay: config.retry_delay(),
            max_delay: config.max_retry_delay(),
            jitter: config.retry_jitter,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = next_delay(attempt, self.strategy, self.base_delay, self.max_delay);
        let fraction = self.jitter.clamp(0.0, 1.0);
        if fraction == 0.0 || base.is_zero() {
            return base;
        }
        let extra = base.mul_f64(rng.gen_range(0.0..=fraction));
        (base + extra).min(self.max_delay)
    }
}

/// Jitter-free delay before retry number `attempt` (1-based), clamped to
/// `max_delay`. Attempt 0 is treated as attempt 1.
pub fn next_delay(
    attempt: u32,
    strategy: RetryStrategy,
    base_delay: Duration,
    max_delay: Duration,
) -> Duration {
    let attempt = attempt.max(1);
    let base_ms = base_delay.as_millis().min(u128::from(u64::MAX)) as u64;
    let max_ms = max_delay.as_millis().min(u128::from(u64::MAX)) as u64;
    let delay_ms = match strategy {
        RetryStrategy::Fixed => base_ms,
        RetryStrategy::Linear => base_ms.saturating_mul(u64::from(attempt)),
        RetryStrategy::Exponential => {
            let shift = (attempt - 1).min(32);
            base_ms.saturating_mul(1u64 << shift)
        }
    };
    Duration::from_millis(delay_ms.min(max_ms))
}

/// Whether `error` may be retried automatically.
///
/// Transport failures, timeouts, 5xx responses and rate limiting are
/// transient. Cancellation, 4xx rejections and local read failures are not.
pub fn is_retryable_error(error: &UploadError) -> bool {
    match error {
        UploadError::Network(_)
        | UploadError::Timeout
        | UploadError::Server { .. }
        | UploadError::RateLimited => true,
        UploadError::Chunk { source, .. } | UploadError::Finalize { source } => {
            is_retryable_error(source)
        }
        UploadError::Validation { .. }
        | UploadError::Cancelled
        | UploadError::Read(_)
        | UploadError::Unknown(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const MS: fn(u64) -> Duration = Duration::from_millis;

    #[test]
    fn exponential_growth_is_clamped() {
        let delays: Vec<_> = (1..=5)
            .map(|a| next_delay(a, RetryStrategy::Exponential, MS(500), MS(4000)))
            .collect();
        assert_eq!(delays, vec![MS(500), MS(1000), MS(2000), MS(4000), MS(4000)]);
    }

    #[test]
    fn linear_growth() {
        assert_eq!(next_delay(1, RetryStrategy::Linear, MS(300), MS(1000)), MS(300));
        assert_eq!(next_delay(3, RetryStrategy::Linear, MS(300), MS(1000)), MS(900));
        assert_eq!(next_delay(4, RetryStrategy::Linear, MS(300), MS(1000)), MS(1000));
    }

    #[test]
    fn fixed_delay_ignores_attempt() {
        for attempt in [1, 2, 10] {
            assert_eq!(next_delay(attempt, RetryStrategy::Fixed, MS(250), MS(1000)), MS(250));
        }
    }

    #[test]
    fn attempt_zero_behaves_like_first() {
        assert_eq!(next_delay(0, RetryStrategy::Exponential, MS(100), MS(800)), MS(100));
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        let d = next_delay(u32::MAX, RetryStrategy::Exponential, MS(1000), MS(30_000));
        assert_eq!(d, MS(30_000));
    }

    #[test]
    fn jitter_stays_within_fraction_and_cap() {
        let policy = BackoffPolicy::new(RetryStrategy::Exponential, MS(1000), MS(10_000))
            .with_jitter(0.3);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let d = policy.delay_with_rng(2, &mut rng);
            assert!(d >= MS(2000), "{d:?}");
            assert!(d <= MS(2600), "{d:?}");
        }

        let capped = policy.delay_with_rng(10, &mut rng);
        assert_eq!(capped, MS(10_000));
    }

    #[test]
    fn policy_from_config() {
        let config = UploadConfig {
            retry_delay_strategy: RetryStrategy::Linear,
            retry_delay_ms: 200,
            max_retry_delay_ms: 900,
            retry_jitter: 0.0,
            ..UploadConfig::default()
        };
        let policy = BackoffPolicy::from_config(&config);
        assert_eq!(policy.delay_for_attempt(2), MS(400));
        assert_eq!(policy.delay_for_attempt(9), MS(900));
    }

    #[test]
    fn retryable_classification() {
        assert!(is_retryable_error(&UploadError::Network("reset".into())));
        assert!(is_retryable_error(&UploadError::Timeout));
        assert!(is_retryable_error(&UploadError::Server { status: 503 }));
        assert!(is_retryable_error(&UploadError::RateLimited));
        assert!(is_retryable_error(&UploadError::Timeout.in_chunk(2)));

        assert!(!is_retryable_error(&UploadError::Validation { status: 400 }));
        assert!(!is_retryable_error(&UploadError::Cancelled));
        assert!(!is_retryable_error(&UploadError::Cancelled.in_chunk(1)));
        assert!(!is_retryable_error(&UploadError::Read("eof".into())));
    }
}
