//! Cache keys for the resources this app reads.
//!
//! Every view builds its keys here so that two screens asking for the same
//! data always land on the same cache entry.

use std::collections::BTreeMap;

use crate::cache::{CacheKey, KeySegment};

pub const ISSUES: &str = "issues";
pub const BOOKMARKS: &str = "bookmarks";

/// Server-side filters for the issue list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IssueFilters {
  pub difficulty: Option<String>,
  pub language: Option<String>,
  /// Free-text search
  pub query: Option<String>,
}

impl IssueFilters {
  /// Parse the filter input line.
  ///
  /// `diff:` and `lang:` prefixes set the difficulty and language; every
  /// other word is part of the free-text query. Matching is case-insensitive
  /// for the prefixed values.
  pub fn parse(input: &str) -> Self {
    let mut filters = Self::default();
    let mut words = Vec::new();

    for word in input.split_whitespace() {
      if let Some(value) = word.strip_prefix("diff:").filter(|v| !v.is_empty()) {
        filters.difficulty = Some(value.to_lowercase());
      } else if let Some(value) = word.strip_prefix("lang:").filter(|v| !v.is_empty()) {
        filters.language = Some(value.to_lowercase());
      } else {
        words.push(word);
      }
    }

    if !words.is_empty() {
      filters.query = Some(words.join(" "));
    }
    filters
  }

  /// Use `difficulty` unless the filter already names one.
  pub fn with_default_difficulty(mut self, difficulty: Option<&str>) -> Self {
    if self.difficulty.is_none() {
      self.difficulty = difficulty.map(str::to_string);
    }
    self
  }

  pub fn is_empty(&self) -> bool {
    self.difficulty.is_none() && self.language.is_none() && self.query.is_none()
  }

  /// Query string pairs for the list endpoint.
  pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
    let mut pairs = Vec::new();
    if let Some(d) = &self.difficulty {
      pairs.push(("difficulty", d.as_str()));
    }
    if let Some(l) = &self.language {
      pairs.push(("language", l.as_str()));
    }
    if let Some(q) = &self.query {
      pairs.push(("q", q.as_str()));
    }
    pairs
  }

  fn to_segment(&self) -> KeySegment {
    let map: BTreeMap<String, KeySegment> = self
      .query_pairs()
      .into_iter()
      .map(|(name, value)| (name.to_string(), KeySegment::from(value)))
      .collect();
    KeySegment::Map(map)
  }

  fn from_segment(segment: &KeySegment) -> Option<Self> {
    let KeySegment::Map(map) = segment else {
      return None;
    };
    let field = |name: &str| map.get(name).and_then(KeySegment::as_str).map(str::to_string);
    Some(Self {
      difficulty: field("difficulty"),
      language: field("language"),
      query: field("q"),
    })
  }
}

/// A logical resource behind a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
  /// `["issues", "list", {filters}]`
  IssueList(IssueFilters),
  /// `["issues", "detail", id]`
  IssueDetail { id: i64 },
  /// `["bookmarks"]`
  Bookmarks,
}

impl Resource {
  pub fn key(&self) -> CacheKey {
    match self {
      Resource::IssueList(filters) => CacheKey::new([ISSUES, "list"]).with(filters.to_segment()),
      Resource::IssueDetail { id } => CacheKey::new([ISSUES, "detail"]).with(*id),
      Resource::Bookmarks => CacheKey::root(BOOKMARKS),
    }
  }

  /// Recover the resource from a key built by [`Resource::key`].
  pub fn from_key(key: &CacheKey) -> Option<Self> {
    let segments = key.segments();
    let names: Vec<Option<&str>> = segments.iter().map(KeySegment::as_str).collect();

    match names.as_slice() {
      [Some(ISSUES), Some("list"), None] => {
        IssueFilters::from_segment(&segments[2]).map(Resource::IssueList)
      }
      [Some(ISSUES), Some("detail"), None] => segments[2]
        .as_i64()
        .map(|id| Resource::IssueDetail { id }),
      [Some(BOOKMARKS)] => Some(Resource::Bookmarks),
      _ => None,
    }
  }

  /// Prefix matching every issue list and detail entry.
  pub fn all_issues() -> CacheKey {
    CacheKey::root(ISSUES)
  }

  /// Prefix matching every issue list, whatever the filters.
  pub fn all_issue_lists() -> CacheKey {
    CacheKey::new([ISSUES, "list"])
  }
}
