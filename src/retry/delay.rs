use rand::Rng;
use std::time::Duration;

/// Wait before retry number `attempt` (1-based: the first retry asks for `delay(1)`).
pub trait DelayPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

impl<F> DelayPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// `base * 2^(attempt - 1)`, capped at `max_delay`, plus uniform jitter in `[0, max_jitter]`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialJitter {
    pub base: Duration,
    pub max_jitter: Duration,
    pub max_delay: Duration,
}

/// 2^20 * 500ms is already far past any sane cap.
const MAX_EXPONENT: u32 = 20;

impl Default for ExponentialJitter {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_jitter: Duration::from_millis(250),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ExponentialJitter {
    pub fn new(base: Duration, max_jitter: Duration, max_delay: Duration) -> Self {
        Self {
            base,
            max_jitter,
            max_delay,
        }
    }

    /// Delay without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let backoff = self.base.saturating_mul(1u32 << exponent);
        backoff.min(self.max_delay.max(self.base))
    }
}

impl DelayPolicy for ExponentialJitter {
    fn delay(&self, attempt: u32) -> Duration {
        let max_jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if max_jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
        };
        self.backoff(attempt).saturating_add(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_cap() {
        let policy = ExponentialJitter::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));
        assert_eq!(policy.backoff(8), Duration::from_secs(60));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn delay_is_at_least_base_and_bounded_by_jitter() {
        let policy = ExponentialJitter::default();
        for attempt in 1..=12 {
            for _ in 0..50 {
                let d = policy.delay(attempt);
                assert!(d >= policy.base);
                assert!(d >= policy.backoff(attempt));
                assert!(d <= policy.backoff(attempt) + policy.max_jitter);
            }
        }
    }

    #[test]
    fn backoff_never_decreases() {
        let policy = ExponentialJitter::default();
        let mut prev = Duration::ZERO;
        for attempt in 0..64 {
            let next = policy.backoff(attempt);
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn closures_are_policies() {
        let zero = |_: u32| Duration::ZERO;
        assert_eq!(zero.delay(3), Duration::ZERO);
    }
}
