//! Capped exponential backoff between connection attempts.

use std::time::Duration;

use crate::error::{Error, Result};

/// Backoff policy for failed connection attempts.
///
/// The first delay is `initial_delay`; each further failure multiplies the
/// delay by `multiplier`, never exceeding `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per failure.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 1.5,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with the default schedule (1s, x1.5, capped at 10s).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before retrying after `attempt` previous failures (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Validate the policy and return an error if invalid.
    ///
    /// Checks that:
    /// - `multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(Error::invalid_config("backoff multiplier must be >= 1.0"));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial backoff delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config(
                "max backoff delay must be >= initial delay",
            ));
        }
        Ok(())
    }
}

/// Running backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Start a fresh schedule.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay to wait now; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Return to the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_schedule() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        let delays: Vec<u128> = (0..8).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1000, 1500, 2250, 3375, 5062, 7593, 10_000, 10_000]);
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_attempt_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_validate() {
        assert!(BackoffPolicy::default().validate().is_ok());
        assert!(BackoffPolicy::default().multiplier(0.5).validate().is_err());
        assert!(BackoffPolicy::default().multiplier(f64::NAN).validate().is_err());
        assert!(
            BackoffPolicy::default()
                .initial_delay(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            BackoffPolicy::default()
                .max_delay(Duration::from_millis(10))
                .validate()
                .is_err()
        );
    }

    proptest! {
        #[test]
        fn delays_are_non_decreasing_and_capped(count in 1usize..64) {
            let policy = BackoffPolicy::default();
            let mut backoff = Backoff::new(policy.clone());
            let mut previous = Duration::ZERO;
            for _ in 0..count {
                let delay = backoff.next_delay();
                prop_assert!(delay >= previous);
                prop_assert!(delay <= policy.max_delay);
                previous = delay;
            }
        }
    }
}
