//! Exponential backoff with jitter between retry rounds.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Computes the wait before the next round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_ms: u64,
    cap_ms: u64,
    jitter_min_ms: u64,
    jitter_max_ms: u64,
}

impl BackoffPolicy {
    /// Build from validated config
    #[inline]
    #[must_use]
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms,
            cap_ms: config.max_delay_ms,
            jitter_min_ms: config.jitter_min_ms,
            jitter_max_ms: config.jitter_max_ms.max(config.jitter_min_ms),
        }
    }

    /// `min(base * 2^attempt, cap)`, without jitter
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.cap_ms))
    }

    /// Uniform draw from the jitter range
    #[must_use]
    pub fn jitter(&self) -> Duration {
        if self.jitter_max_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::rng().random_range(self.jitter_min_ms..=self.jitter_max_ms);
        Duration::from_millis(ms)
    }

    /// Full delay for the retry following `attempt`
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.jitter()
    }

    /// Bounds of the jitter range
    #[inline]
    #[must_use]
    pub fn jitter_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.jitter_min_ms),
            Duration::from_millis(self.jitter_max_ms),
        )
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn doubles_until_cap() {
        let policy = BackoffPolicy::default();
        let delays: Vec<_> = (0..6).map(|a| policy.base_delay(a).as_millis()).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
    }

    #[test]
    fn huge_attempts_saturate_at_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(63), Duration::from_millis(10_000));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn no_jitter_when_disabled() {
        let policy = BackoffPolicy::new(&BackoffConfig::default().without_jitter());
        assert_eq!(policy.delay(1), Duration::from_millis(2_000));
    }

    proptest! {
        #[test]
        fn prop_jitter_stays_in_range(attempt in 0u32..20) {
            let policy = BackoffPolicy::default();
            let delay = policy.delay(attempt);
            let base = policy.base_delay(attempt);
            let (low, high) = policy.jitter_bounds();
            prop_assert_eq!((low, high), (Duration::from_millis(100), Duration::from_millis(500)));
            prop_assert!(delay >= base + low);
            prop_assert!(delay <= base + high);
        }

        #[test]
        fn prop_strictly_increasing_below_cap(base in 1u64..2_000, attempt in 0u32..12) {
            let config = BackoffConfig {
                base_delay_ms: base,
                max_delay_ms: 1_000_000,
                ..BackoffConfig::default()
            };
            let policy = BackoffPolicy::new(&config);
            let (this, next) = (policy.base_delay(attempt), policy.base_delay(attempt + 1));
            if next.as_millis() < 1_000_000 {
                prop_assert!(next > this);
            } else {
                prop_assert!(next >= this);
            }
        }
    }
}
