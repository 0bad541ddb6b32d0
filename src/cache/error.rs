//! Error taxonomy for the sync core.

use std::sync::Arc;
use thiserror::Error;

/// Failure of a fetch or mutation as seen by the cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// Transport failure, timeout or server error. Retryable.
  #[error("Network error: {0}")]
  Network(String),

  /// Authorization failure. Surfaced to the global auth handler.
  #[error("Not authorized: {0}")]
  Auth(String),

  #[error("Not found: {0}")]
  NotFound(String),

  /// Any other client error (bad request, conflict). Not retryable.
  #[error("Request rejected: {0}")]
  Rejected(String),

  /// The request was cancelled. Never shown to the user.
  #[error("Request aborted")]
  Aborted,

  #[error("Serialization error: {0}")]
  Serialization(String),
}

impl From<serde_json::Error> for FetchError {
  fn from(e: serde_json::Error) -> Self {
    FetchError::Serialization(e.to_string())
  }
}

/// Errors raised by a durable storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Storage quota exceeded: {needed} bytes needed, {available} available")]
  QuotaExceeded { needed: usize, available: usize },

  #[error("Storage lock poisoned")]
  LockPoisoned,

  #[error("Storage I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Could not determine data directory")]
  NoDataDir,
}

/// How the retry loop treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  Retryable,
  NonRetryable,
  /// Dropped silently, no error state is written.
  Aborted,
}

/// Caller-supplied error classifier.
pub type Classifier = Arc<dyn Fn(&FetchError) -> ErrorClass + Send + Sync>;

/// Default classification: only network failures are worth retrying.
pub fn default_classify(error: &FetchError) -> ErrorClass {
  match error {
    FetchError::Network(_) => ErrorClass::Retryable,
    FetchError::Aborted => ErrorClass::Aborted,
    FetchError::Auth(_)
    | FetchError::NotFound(_)
    | FetchError::Rejected(_)
    | FetchError::Serialization(_) => ErrorClass::NonRetryable,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_classify() {
    assert_eq!(
      default_classify(&FetchError::Network("reset".into())),
      ErrorClass::Retryable
    );
    assert_eq!(
      default_classify(&FetchError::Auth("401".into())),
      ErrorClass::NonRetryable
    );
    assert_eq!(
      default_classify(&FetchError::NotFound("issue 7".into())),
      ErrorClass::NonRetryable
    );
    assert_eq!(
      default_classify(&FetchError::Rejected("409".into())),
      ErrorClass::NonRetryable
    );
    assert_eq!(default_classify(&FetchError::Aborted), ErrorClass::Aborted);
  }

  #[test]
  fn test_serde_error_converts_to_serialization() {
    let err = serde_json::from_str::<u32>("nope").unwrap_err();
    assert!(matches!(FetchError::from(err), FetchError::Serialization(_)));
  }
}
