use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::error::{default_classify, Classifier, ErrorClass, FetchError};

/// Retry schedule for background fetches.
#[derive(Clone)]
pub struct RetryPolicy {
  /// Retries after the first attempt.
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
  classify: Classifier,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 2,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
      classify: Arc::new(default_classify),
    }
  }
}

impl RetryPolicy {
  pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
    Self {
      max_retries,
      base_delay,
      max_delay,
      ..Self::default()
    }
  }

  /// Never retry.
  pub fn none() -> Self {
    Self::new(0, Duration::ZERO, Duration::ZERO)
  }

  /// Replace the error classifier.
  pub fn with_classifier<F>(mut self, classify: F) -> Self
  where
    F: Fn(&FetchError) -> ErrorClass + Send + Sync + 'static,
  {
    self.classify = Arc::new(classify);
    self
  }

  pub fn classify(&self, error: &FetchError) -> ErrorClass {
    (self.classify)(error)
  }

  /// `base * 2^attempt`, capped at `max_delay`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    self
      .base_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }

  /// Whether a failed attempt (0-based) should be retried.
  pub fn should_retry(&self, attempt: u32, error: &FetchError) -> bool {
    attempt < self.max_retries && self.classify(error) == ErrorClass::Retryable
  }
}

impl fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("max_retries", &self.max_retries)
      .field("base_delay", &self.base_delay)
      .field("max_delay", &self.max_delay)
      .finish_non_exhaustive()
  }
}
