//! Structural cache keys.
//!
//! A key is an ordered list of segments compared by value, never by identity.
//! Map segments are stored in a `BTreeMap`, so `{a, b}` and `{b, a}` are the
//! same key. Floats are rejected because they have no total equality.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Invalid key material. A programmer error, not a runtime condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
  #[error("Cache key must be a JSON array, got: {0}")]
  NotAnArray(String),

  #[error("Floating point values cannot be part of a cache key: {0}")]
  Float(String),

  #[error("Integer out of range for a cache key: {0}")]
  OutOfRange(String),

  #[error("Failed to serialize key segment: {0}")]
  Serialize(String),
}

/// One segment of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum KeySegment {
  Null,
  Bool(bool),
  Int(i64),
  Str(String),
  List(Vec<KeySegment>),
  Map(BTreeMap<String, KeySegment>),
}

impl KeySegment {
  /// Build a segment from any serializable value (e.g. a filter struct).
  pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, KeyError> {
    let value = serde_json::to_value(value).map_err(|e| KeyError::Serialize(e.to_string()))?;
    Self::try_from(value)
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      KeySegment::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      KeySegment::Int(n) => Some(*n),
      _ => None,
    }
  }
}

impl TryFrom<Value> for KeySegment {
  type Error = KeyError;

  fn try_from(value: Value) -> Result<Self, Self::Error> {
    Ok(match value {
      Value::Null => KeySegment::Null,
      Value::Bool(b) => KeySegment::Bool(b),
      Value::Number(n) => {
        if let Some(i) = n.as_i64() {
          KeySegment::Int(i)
        } else if n.is_u64() {
          return Err(KeyError::OutOfRange(n.to_string()));
        } else {
          return Err(KeyError::Float(n.to_string()));
        }
      }
      Value::String(s) => KeySegment::Str(s),
      Value::Array(items) => KeySegment::List(
        items
          .into_iter()
          .map(KeySegment::try_from)
          .collect::<Result<_, _>>()?,
      ),
      Value::Object(map) => KeySegment::Map(
        map
          .into_iter()
          .map(|(k, v)| KeySegment::try_from(v).map(|segment| (k, segment)))
          .collect::<Result<_, _>>()?,
      ),
    })
  }
}

impl From<KeySegment> for Value {
  fn from(segment: KeySegment) -> Self {
    match segment {
      KeySegment::Null => Value::Null,
      KeySegment::Bool(b) => Value::Bool(b),
      KeySegment::Int(n) => Value::from(n),
      KeySegment::Str(s) => Value::String(s),
      KeySegment::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
      KeySegment::Map(map) => Value::Object(
        map
          .into_iter()
          .map(|(k, v)| (k, Value::from(v)))
          .collect::<Map<_, _>>(),
      ),
    }
  }
}

impl From<&str> for KeySegment {
  fn from(s: &str) -> Self {
    KeySegment::Str(s.to_string())
  }
}

impl From<String> for KeySegment {
  fn from(s: String) -> Self {
    KeySegment::Str(s)
  }
}

impl From<i64> for KeySegment {
  fn from(n: i64) -> Self {
    KeySegment::Int(n)
  }
}

impl From<u32> for KeySegment {
  fn from(n: u32) -> Self {
    KeySegment::Int(i64::from(n))
  }
}

impl From<bool> for KeySegment {
  fn from(b: bool) -> Self {
    KeySegment::Bool(b)
  }
}

/// Canonical cache key. Immutable once built; `with` returns a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<KeySegment>);

impl CacheKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<KeySegment>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  /// Single-segment key, usually a resource family such as `"issues"`.
  pub fn root(segment: impl Into<KeySegment>) -> Self {
    Self(vec![segment.into()])
  }

  /// Extend the key by one segment.
  pub fn with(&self, segment: impl Into<KeySegment>) -> Self {
    let mut segments = self.0.clone();
    segments.push(segment.into());
    Self(segments)
  }

  /// Parse a key from its JSON array form.
  pub fn from_json(value: Value) -> Result<Self, KeyError> {
    match value {
      Value::Array(items) => Ok(Self(
        items
          .into_iter()
          .map(KeySegment::try_from)
          .collect::<Result<_, _>>()?,
      )),
      other => Err(KeyError::NotAnArray(other.to_string())),
    }
  }

  pub fn to_json(&self) -> Value {
    Value::Array(self.0.iter().cloned().map(Value::from).collect())
  }

  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }

  /// The resource family, used for the persistence allow-list.
  pub fn first_segment(&self) -> Option<&str> {
    self.0.first().and_then(KeySegment::as_str)
  }

  /// Prefix match used by invalidation (`["issues"]` matches every issue key).
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// Stable fixed-length hash of the canonical encoding.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // BTreeMap ordering makes this encoding canonical
    write!(f, "{}", self.to_json())
  }
}
