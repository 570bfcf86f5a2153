use std::time::Duration;

use rand::Rng;

/// Backoff applied between attempts of an aborted transaction.
///
/// Retry `n` (1-based) waits `base_delay * multiplier^(n-1)`, capped at
/// `max_delay`, then scaled by a uniform factor in `[1 - jitter, 1 + jitter]`.
/// A backend-supplied retry delay takes precedence over this curve.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Whether another attempt may follow `attempts` failed ones.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exp_delay = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = exp_delay.min(self.max_delay.as_secs_f64());
        let span = self.jitter.clamp(0.0, 1.0);
        let factor = if span > 0.0 {
            1.0 + rand::thread_rng().gen_range(-span..=span)
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: 0.0,
            max_delay: Duration::from_millis(50),
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(50));
        assert_eq!(policy.delay_for(30), Duration::from_millis(50));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn attempts_are_capped() {
        let policy = RetryPolicy::immediate(3);
        assert!(policy.allows(1));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
        assert_eq!(policy.delay_for(2), Duration::ZERO);
    }
}
