//! Exponential backoff with jitter for rate-limited calls.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Backoff schedule: attempt `i` waits `2^i * base + uniform[0, jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
  base: Duration,
  jitter: Duration,
  max_retries: u32,
}

impl Default for BackoffPolicy {
  fn default() -> Self {
    Self::from(&RetryConfig::default())
  }
}

impl From<&RetryConfig> for BackoffPolicy {
  fn from(config: &RetryConfig) -> Self {
    Self {
      base: Duration::from_millis(config.base_delay_ms),
      jitter: Duration::from_millis(config.jitter_ms),
      max_retries: config.max_retries,
    }
  }
}

impl BackoffPolicy {
  /// Whether a rate-limited attempt with this index may be retried.
  pub fn should_retry(&self, attempt: u32) -> bool {
    attempt < self.max_retries
  }

  /// Smallest delay attempt `attempt` can get.
  pub fn min_delay(&self, attempt: u32) -> Duration {
    self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
  }

  pub fn delay_for(&self, attempt: u32) -> Duration {
    let jitter_ms = self.jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
      Duration::ZERO
    } else {
      Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    };
    self.min_delay(attempt).saturating_add(jitter)
  }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
  Success,
  RateLimited,
  HardFailure,
}

/// One HTTP attempt within a logical send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
  /// 0-based, strictly increasing within a send
  pub index: u32,
  /// Wait before the next attempt; only set when a retry follows
  pub delay: Option<Duration>,
  pub outcome: AttemptOutcome,
}

impl RetryAttempt {
  pub fn rate_limited(index: u32, delay: Duration) -> Self {
    Self {
      index,
      delay: Some(delay),
      outcome: AttemptOutcome::RateLimited,
    }
  }

  pub fn finished(index: u32, outcome: AttemptOutcome) -> Self {
    Self {
      index,
      delay: None,
      outcome,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_policy() {
    let policy = BackoffPolicy::default();
    assert!(policy.should_retry(0));
    assert!(policy.should_retry(4));
    assert!(!policy.should_retry(5));
  }

  #[test]
  fn test_delay_bounds() {
    let policy = BackoffPolicy::default();
    for attempt in 0..5u32 {
      let low = Duration::from_millis(2u64.pow(attempt) * 1000);
      let high = low + Duration::from_millis(1000);
      for _ in 0..50 {
        let delay = policy.delay_for(attempt);
        assert!(
          delay >= low && delay < high,
          "attempt {} delay {:?} outside [{:?}, {:?})",
          attempt,
          delay,
          low,
          high
        );
      }
    }
  }

  #[test]
  fn test_zero_jitter_is_exact() {
    let policy = BackoffPolicy::from(&RetryConfig {
      base_delay_ms: 10,
      jitter_ms: 0,
      max_retries: 3,
    });
    assert_eq!(policy.delay_for(0), Duration::from_millis(10));
    assert_eq!(policy.delay_for(3), Duration::from_millis(80));
  }

  #[test]
  fn test_huge_attempt_saturates() {
    let policy = BackoffPolicy::default();
    assert!(policy.min_delay(64) >= policy.min_delay(31));
  }
}
