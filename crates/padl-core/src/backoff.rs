//! Restart backoff schedule.
//!
//! Exponential growth from a base period, bounded by a ceiling. The growth
//! factor and ceiling are configurable; defaults live in
//! [`crate::config::LauncherConfig`].

use std::time::Duration;

/// Computes the delay before the next restart attempt.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    ceiling: Duration,
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, ceiling: Duration) -> Self {
        Self {
            base,
            factor: factor.max(1.0),
            ceiling,
        }
    }

    /// Delay after `failures` consecutive failures (1-based). Zero failures
    /// means no delay.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = (failures - 1).min(32);
        let scaled = self.base.as_secs_f64() * self.factor.powi(exp as i32);
        let capped = scaled.min(self.ceiling.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(5), 2.0, Duration::from_secs(300))
    }

    #[test]
    fn test_first_failure_uses_base_period() {
        assert_eq!(backoff().delay(1), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_is_monotonically_non_decreasing() {
        let b = backoff();
        let mut prev = Duration::ZERO;
        for failures in 0..40 {
            let d = b.delay(failures);
            assert!(d >= prev, "delay regressed at failure {}", failures);
            prev = d;
        }
    }

    #[test]
    fn test_delay_is_bounded_by_ceiling() {
        let b = backoff();
        for failures in 1..100 {
            assert!(b.delay(failures) <= Duration::from_secs(300));
        }
        assert_eq!(b.delay(50), Duration::from_secs(300));
    }

    #[test]
    fn test_exponential_growth() {
        let b = backoff();
        assert_eq!(b.delay(2), Duration::from_secs(10));
        assert_eq!(b.delay(3), Duration::from_secs(20));
        assert_eq!(b.delay(4), Duration::from_secs(40));
    }

    #[test]
    fn test_factor_below_one_is_clamped() {
        let b = Backoff::new(Duration::from_secs(5), 0.5, Duration::from_secs(300));
        assert!(b.delay(5) >= b.delay(1));
    }
}
