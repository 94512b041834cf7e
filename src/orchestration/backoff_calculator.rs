//! # Backoff Calculator
//!
//! Delay between a failed task and its requeue: `base × multiplier^retry_count`,
//! capped at `max_delay_ms`, with optional symmetric jitter.

use crate::config::BackoffConfig;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before requeueing a task that has already been retried `retry_count` times
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let raw = base * self.config.multiplier.powi(exponent);
        let capped = raw.min(self.config.max_delay_ms as f64).max(0.0) as u64;

        let delay_ms = if self.config.jitter_enabled {
            self.apply_jitter(capped)
        } else {
            capped
        };
        Duration::from_millis(delay_ms)
    }

    pub fn next_retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(retry_count))
            .unwrap_or_else(|_| chrono::Duration::milliseconds(self.config.max_delay_ms as i64));
        now + delay
    }

    /// Shift `delay_ms` by a uniform offset within `±max_jitter` of itself
    fn apply_jitter(&self, delay_ms: u64) -> u64 {
        use rand::Rng;

        let spread = (delay_ms as f64 * self.config.max_jitter) as i64;
        if spread <= 0 {
            return delay_ms;
        }
        delay_ms.saturating_add_signed(rand::thread_rng().gen_range(-spread..=spread))
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_delays_double_from_one_second() {
        let calculator = BackoffCalculator::default();
        assert_eq!(calculator.delay_for(0), Duration::from_secs(1));
        assert_eq!(calculator.delay_for(1), Duration::from_secs(2));
        assert_eq!(calculator.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped() {
        let calculator = BackoffCalculator::default();
        assert_eq!(calculator.delay_for(20), Duration::from_secs(300));
        assert_eq!(calculator.delay_for(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let calculator = BackoffCalculator::new(BackoffConfig {
            jitter_enabled: true,
            max_jitter: 0.1,
            ..BackoffConfig::default()
        });
        for _ in 0..100 {
            let delay = calculator.delay_for(2).as_millis() as u64;
            assert!((3_600..=4_400).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn jitter_moves_delays_both_ways() {
        let calculator = BackoffCalculator::new(BackoffConfig {
            jitter_enabled: true,
            max_jitter: 0.5,
            ..BackoffConfig::default()
        });
        let samples: Vec<u64> = (0..200)
            .map(|_| calculator.delay_for(0).as_millis() as u64)
            .collect();
        assert!(samples.iter().any(|&d| d < 1_000));
        assert!(samples.iter().any(|&d| d > 1_000));
        assert!(samples.iter().all(|&d| (500..=1_500).contains(&d)));
    }

    proptest! {
        #[test]
        fn delays_never_decrease_and_never_exceed_cap(
            base in 1u64..5_000,
            cap_factor in 1u64..1_000,
            retries in 0u32..64,
        ) {
            let calculator = BackoffCalculator::new(BackoffConfig {
                base_delay_ms: base,
                max_delay_ms: base * cap_factor,
                ..BackoffConfig::default()
            });
            let current = calculator.delay_for(retries);
            let next = calculator.delay_for(retries + 1);
            prop_assert!(next >= current);
            prop_assert!(next.as_millis() as u64 <= base * cap_factor);
        }
    }
}
