//! Serde types matching the issue API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issue as listed and shown in detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
  pub id: i64,
  pub title: String,
  /// `owner/name`
  pub repository: String,
  #[serde(default)]
  pub language: Option<String>,
  /// e.g. "beginner", "intermediate", "advanced"
  #[serde(default)]
  pub difficulty: Option<String>,
  #[serde(default)]
  pub labels: Vec<String>,
  pub url: String,
  /// Only present on the detail endpoint
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  #[serde(default)]
  pub comments: u32,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
  pub issue_id: i64,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
}

impl Bookmark {
  /// A bookmark that exists only locally until the server confirms it.
  pub fn pending(issue_id: i64) -> Self {
    Self {
      issue_id,
      created_at: None,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct NewBookmark {
  pub issue_id: i64,
}

/// Error body returned by the API on failure
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  #[serde(alias = "error")]
  pub message: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_issue_optional_fields() {
    let issue: Issue = serde_json::from_value(json!({
      "id": 12,
      "title": "Panic on empty input",
      "repository": "acme/parser",
      "url": "https://example.com/acme/parser/issues/12"
    }))
    .unwrap();
    assert_eq!(issue.language, None);
    assert!(issue.labels.is_empty());
    assert_eq!(issue.comments, 0);
  }

  #[test]
  fn test_error_body_aliases() {
    let body: ApiErrorBody = serde_json::from_str(r#"{"error": "token expired"}"#).unwrap();
    assert_eq!(body.message, "token expired");
    let body: ApiErrorBody = serde_json::from_str(r#"{"message": "no such issue"}"#).unwrap();
    assert_eq!(body.message, "no such issue");
  }
}
