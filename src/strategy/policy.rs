use crate::core::{DbError, Result};
use rand::Rng;
use std::time::Duration;

pub const DEFAULT_MAX_RETRY_COUNT: usize = 6;
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_DELAY_COEFFICIENT: Duration = Duration::from_secs(1);

const EXPONENTIAL_BASE: f64 = 2.0;
const RANDOM_FACTOR: f64 = 1.1;

/// Retry budget of an execution strategy.
///
/// The delay before the `i`-th retry (0-based) is
/// `delay_coefficient * (2^i - 1)` scaled by a random factor in `[1.0, 1.1)`.
/// A retry is granted only while all of these hold:
///
/// - fewer than `max_retry_count` transient failures were retried so far,
/// - the computed delay does not exceed `max_retry_delay`,
/// - if `max_elapsed` is set, the time already spent plus the delay stays
///   within it.
///
/// The first retry is immediate.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retry_count: usize,
    max_retry_delay: Duration,
    delay_coefficient: Duration,
    max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            delay_coefficient: DEFAULT_DELAY_COEFFICIENT,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retry_count: usize, max_retry_delay: Duration) -> Self {
        Self {
            max_retry_count,
            max_retry_delay,
            ..Default::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retry_count: 0,
            max_retry_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn with_delay_coefficient(mut self, coefficient: Duration) -> Self {
        self.delay_coefficient = coefficient;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    pub fn max_retry_count(&self) -> usize {
        self.max_retry_count
    }

    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    pub fn delay_coefficient(&self) -> Duration {
        self.delay_coefficient
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed
    }

    pub fn retries_on_failure(&self) -> bool {
        self.max_retry_count > 0
    }

    /// Delay before retrying after the `retry_index`-th transient failure,
    /// or `None` when the budget is exhausted.
    pub fn next_delay(&self, retry_index: usize, elapsed: Duration) -> Option<Duration> {
        let factor = rand::thread_rng().gen_range(1.0..RANDOM_FACTOR);
        self.delay_with_factor(retry_index, elapsed, factor)
    }

    pub(crate) fn delay_with_factor(
        &self,
        retry_index: usize,
        elapsed: Duration,
        factor: f64,
    ) -> Option<Duration> {
        if retry_index >= self.max_retry_count {
            return None;
        }

        let exponent = retry_index.min(i32::MAX as usize) as i32;
        let delta = (EXPONENTIAL_BASE.powi(exponent) - 1.0) * factor;
        let seconds = self.delay_coefficient.as_secs_f64() * delta;
        let delay = Duration::try_from_secs_f64(seconds).ok()?;

        if delay > self.max_retry_delay {
            return None;
        }

        if let Some(max_elapsed) = self.max_elapsed
            && elapsed.saturating_add(delay) > max_elapsed
        {
            return None;
        }

        Some(delay)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retries_on_failure() && self.delay_coefficient.is_zero() {
            return Err(DbError::Configuration(
                "delay coefficient must be positive when retries are enabled".into(),
            ));
        }

        if let Some(max_elapsed) = self.max_elapsed
            && max_elapsed < self.max_retry_delay
        {
            return Err(DbError::Configuration(format!(
                "max elapsed time ({:?}) is shorter than the max retry delay ({:?})",
                max_elapsed, self.max_retry_delay
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn rounded_millis(delay: Option<Duration>) -> Option<u64> {
        delay.map(|d| (d.as_secs_f64() * 1000.0).round() as u64)
    }

    fn test_policy() -> RetryPolicy {
        RetryPolicy::new(10, ms(100)).with_delay_coefficient(ms(10))
    }

    #[test]
    fn test_first_retry_is_immediate() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0, Duration::ZERO), Some(Duration::ZERO));
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let policy = test_policy();
        let delays: Vec<_> = (0..4)
            .map(|i| rounded_millis(policy.delay_with_factor(i, Duration::ZERO, 1.0)))
            .collect();
        assert_eq!(delays, vec![Some(0), Some(10), Some(30), Some(70)]);
    }

    #[test]
    fn test_delay_ceiling_exhausts_budget() {
        let policy = test_policy();
        // Even at the top of the jitter range the fourth retry fits...
        assert!(policy.delay_with_factor(3, Duration::ZERO, 1.0999).is_some());
        // ...and the fifth never does.
        assert_eq!(policy.delay_with_factor(4, Duration::ZERO, 1.0), None);
        assert_eq!(policy.next_delay(4, Duration::ZERO), None);
    }

    #[test]
    fn test_retry_count_exhausts_budget() {
        let policy = RetryPolicy::new(2, Duration::from_secs(60));
        assert!(policy.next_delay(0, Duration::ZERO).is_some());
        assert!(policy.next_delay(1, Duration::ZERO).is_some());
        assert_eq!(policy.next_delay(2, Duration::ZERO), None);
    }

    #[test]
    fn test_elapsed_ceiling() {
        let policy = test_policy().with_max_elapsed(ms(120));
        assert_eq!(
            rounded_millis(policy.delay_with_factor(2, ms(50), 1.0)),
            Some(30)
        );
        assert_eq!(policy.delay_with_factor(2, ms(100), 1.0), None);
    }

    #[test]
    fn test_huge_retry_index_does_not_overflow() {
        let policy = RetryPolicy::new(usize::MAX, Duration::MAX);
        assert_eq!(policy.delay_with_factor(5000, Duration::ZERO, 1.0), None);
    }

    #[test]
    fn test_none_policy() {
        let policy = RetryPolicy::none();
        assert!(!policy.retries_on_failure());
        assert_eq!(policy.next_delay(0, Duration::ZERO), None);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());

        let zero_coefficient =
            RetryPolicy::default().with_delay_coefficient(Duration::ZERO);
        assert!(zero_coefficient.validate().is_err());

        let short_elapsed = test_policy().with_max_elapsed(ms(50));
        assert!(short_elapsed.validate().is_err());
    }
}
