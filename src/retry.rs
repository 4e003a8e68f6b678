//! Retry budget, backoff and inter-episode pacing

use rand::Rng;
use std::time::Duration;

/// Blocks the calling job. Swapped out in tests so nothing really sleeps.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per episode, first one included
    pub max_retries: u32,
    /// Delay unit; the wait after attempt `n` is `unit * 2^n`
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff, uncapped inside the retry budget.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_unit.checked_mul(factor).unwrap_or(Duration::MAX)
    }
}

/// Per-episode attempt counter. Lives only as long as one episode resolution.
#[derive(Debug, Default)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt. Returns the delay before the next one, or
    /// `None` once the budget is spent.
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt < policy.max_retries {
            Some(policy.delay_for(self.attempt))
        } else {
            None
        }
    }
}

/// Random pause between episodes of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Uniform in `[min, max]`
    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let ms = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(ms as u64)
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(64), Duration::MAX);
    }

    #[test]
    fn test_retry_state_spends_budget() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::new();

        assert_eq!(state.record_failure(&policy), Some(Duration::from_secs(2)));
        assert_eq!(state.record_failure(&policy), Some(Duration::from_secs(4)));
        assert_eq!(state.record_failure(&policy), None);
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn test_single_attempt_budget() {
        let policy = RetryPolicy {
            max_retries: 1,
            backoff_unit: Duration::from_millis(10),
        };
        let mut state = RetryState::new();
        assert_eq!(state.record_failure(&policy), None);
    }

    #[test]
    fn test_pacing_stays_in_bounds() {
        let pacing = Pacing::new(Duration::from_millis(1000), Duration::from_millis(3000));
        for _ in 0..100 {
            let d = pacing.next_delay();
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn test_pacing_swapped_bounds_and_none() {
        let pacing = Pacing::new(Duration::from_millis(50), Duration::from_millis(10));
        let d = pacing.next_delay();
        assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(50));
        assert_eq!(Pacing::none().next_delay(), Duration::ZERO);
    }
}
