use rand::Rng;
use std::time::Duration;

use crate::config::Config;

/// Exponential backoff with proportional jitter for repeated fetch failures.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.poll_interval(),
            config.backoff_max(),
            config.backoff_jitter_ratio,
        )
    }

    /// Delay before the next attempt, without jitter.
    ///
    /// The first failure waits one base interval, then it doubles up to `max`.
    #[must_use]
    pub fn ceiling(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay before the next attempt, with up to `jitter_ratio` extra on top.
    #[must_use]
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let ceiling = self.ceiling(consecutive_failures);
        if self.jitter_ratio <= 0.0 {
            return ceiling;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        ceiling + ceiling.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let backoff = Backoff::new(Duration::from_secs(3), Duration::from_secs(30), 0.0);
        assert_eq!(backoff.delay(1), Duration::from_secs(3));
        assert_eq!(backoff.delay(2), Duration::from_secs(6));
        assert_eq!(backoff.delay(3), Duration::from_secs(12));
        assert_eq!(backoff.delay(4), Duration::from_secs(24));
        assert_eq!(backoff.delay(5), Duration::from_secs(30));
        assert_eq!(backoff.delay(500), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(30), 0.2);
        for failures in 1..6 {
            let ceiling = backoff.ceiling(failures);
            for _ in 0..50 {
                let delay = backoff.delay(failures);
                assert!(delay >= ceiling);
                assert!(delay <= ceiling.mul_f64(1.2) + Duration::from_millis(1));
            }
        }
    }

    #[test]
    fn max_below_base_is_raised() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1), 0.0);
        assert_eq!(backoff.delay(3), Duration::from_secs(5));
    }
}
