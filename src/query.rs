//! View-side handle on a cached query.
//!
//! A `Query<T>` watches one cache key. It never owns the data: the
//! [`CacheStore`] does, and several queries on the same key share one entry
//! and one in-flight fetch.
//!
//! # Example
//!
//! ```ignore
//! let mut query: Query<Vec<Issue>> =
//!     Query::new(store.clone(), Resource::Bookmarks.key(), api.fetcher());
//!
//! // Start fetching (or serve from cache)
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(data) => render_data(data),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::cache::{CacheEntry, CacheKey, CacheStore, EntryStatus, SharedFetcher, Subscription};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Nothing cached yet and a fetch is running
  Loading,
  /// Data is available, possibly stale
  Success(T),
  /// Query failed and there is no data to fall back on
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Observer of one cache key.
///
/// Holding a started query keeps its entry alive through garbage collection.
pub struct Query<T> {
  store: CacheStore,
  key: CacheKey,
  fetcher: SharedFetcher,
  stale_time: Duration,
  state: QueryState<T>,
  /// Error of the last failed refresh, shown next to stale data
  last_error: Option<String>,
  /// Entry revision and fetch flag the state was built from
  seen: Option<(Option<u64>, bool)>,
  subscription: Option<Subscription>,
}

impl<T: DeserializeOwned> Query<T> {
  /// Create a query for `key`. Nothing happens until `fetch()`.
  pub fn new(store: CacheStore, key: CacheKey, fetcher: SharedFetcher) -> Self {
    let stale_time = store.config().stale_time;
    Self {
      store,
      key,
      fetcher,
      stale_time,
      state: QueryState::Idle,
      last_error: None,
      seen: None,
      subscription: None,
    }
  }

  /// Override the store's default stale time for this query.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Error from the most recent refresh, even when older data is shown.
  pub fn last_error(&self) -> Option<&str> {
    self.last_error.as_deref()
  }

  /// A background fetch for this key is running.
  pub fn is_fetching(&self) -> bool {
    self.store.is_fetching(&self.key)
  }

  /// Check if the cached data is older than the stale time.
  pub fn is_stale(&self) -> bool {
    match self.store.read(&self.key) {
      Some(entry) => !entry.is_fresh(self.store.now(), self.stale_time),
      None => true,
    }
  }

  /// Serve from cache and refresh in the background if stale.
  pub fn fetch(&mut self) {
    if self.subscription.is_none() {
      self.subscription = Some(self.store.subscribe(&self.key));
    }
    self
      .store
      .ensure_fresh(&self.key, self.stale_time, self.fetcher.clone());
    self.sync();
  }

  /// Force a refetch, superseding any fetch already running.
  pub fn refetch(&mut self) {
    if self.subscription.is_none() {
      self.subscription = Some(self.store.subscribe(&self.key));
    }
    self.store.refetch(&self.key, self.fetcher.clone());
    self.sync();
  }

  /// Point the query at another key. The old entry stays cached.
  pub fn set_key(&mut self, key: CacheKey) {
    if key == self.key {
      return;
    }
    self.key = key;
    self.subscription = None;
    self.seen = None;
    self.last_error = None;
    self.state = QueryState::Idle;
    self.fetch();
  }

  /// Pick up changes from the cache.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick
  /// handler. An entry invalidated since the last poll is refetched here.
  pub fn poll(&mut self) -> bool {
    if self.subscription.is_none() {
      return false;
    }

    // Failed entries wait for an explicit refetch
    let invalidated = self
      .store
      .read(&self.key)
      .is_some_and(|entry| entry.invalidated && entry.status != EntryStatus::Error);
    if invalidated && !self.store.is_fetching(&self.key) {
      self
        .store
        .ensure_fresh(&self.key, self.stale_time, self.fetcher.clone());
    }

    self.sync()
  }

  /// Rebuild the state from the cache entry.
  fn sync(&mut self) -> bool {
    let entry = self.store.read(&self.key);
    let fetching = self.is_fetching();
    let seen = (entry.as_ref().map(|e| e.revision), fetching);
    if self.seen == Some(seen) {
      return false;
    }
    self.seen = Some(seen);

    let (state, last_error) = match entry {
      Some(entry) => Self::from_entry(entry, fetching),
      None if fetching => (QueryState::Loading, None),
      None => (QueryState::Idle, None),
    };
    self.state = state;
    self.last_error = last_error;
    true
  }

  fn from_entry(entry: CacheEntry, fetching: bool) -> (QueryState<T>, Option<String>) {
    let last_error = match (&entry.status, &entry.error) {
      (EntryStatus::Error, Some(e)) => Some(e.to_string()),
      _ => None,
    };

    match entry.data {
      Some(data) => match serde_json::from_value(data) {
        Ok(value) => (QueryState::Success(value), last_error),
        Err(e) => (
          QueryState::Error(format!("Unexpected response shape: {}", e)),
          last_error,
        ),
      },
      None => match last_error {
        Some(e) => (QueryState::Error(e.clone()), Some(e)),
        None if fetching => (QueryState::Loading, None),
        None => (QueryState::Idle, None),
      },
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{FetchError, RequestToken, RetryPolicy, StoreConfig};
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn store() -> CacheStore {
    CacheStore::new(StoreConfig {
      retry: RetryPolicy::none(),
      ..StoreConfig::default()
    })
  }

  fn fetcher_of(value: Value) -> SharedFetcher {
    Arc::new(move |_key: CacheKey, _token: RequestToken| {
      let value = value.clone();
      async move { Ok::<_, FetchError>(value) }
    })
  }

  #[tokio::test]
  async fn test_query_success() {
    let mut query: Query<Vec<i32>> =
      Query::new(store(), CacheKey::root("numbers"), fetcher_of(json!([1, 2, 3])));

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    // Wait for the result
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
    assert!(!query.poll());
  }

  #[tokio::test]
  async fn test_query_error() {
    let fetcher: SharedFetcher = Arc::new(|_key: CacheKey, _token: RequestToken| async {
      Err::<Value, _>(FetchError::NotFound("issue 9".into()))
    });
    let mut query: Query<i32> = Query::new(store(), CacheKey::root("issue"), fetcher);

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_error());
    assert_eq!(query.error(), Some("Not found: issue 9"));
  }

  #[tokio::test]
  async fn test_stale_data_survives_failed_refresh() {
    let store = store();
    let key = CacheKey::root("bookmarks");
    store.write(&key, json!([4]));
    store.invalidate(&key);

    let fetcher: SharedFetcher = Arc::new(|_key: CacheKey, _token: RequestToken| async {
      Err::<Value, _>(FetchError::Network("offline".into()))
    });
    let mut query: Query<Vec<i32>> = Query::new(store, key, fetcher);
    query.fetch();
    // Cached data is served right away
    assert_eq!(query.data(), Some(&vec![4]));

    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    assert_eq!(query.data(), Some(&vec![4]));
    assert_eq!(query.last_error(), Some("Network error: offline"));
  }

  #[tokio::test]
  async fn test_fresh_cache_does_not_fetch() {
    let store = store();
    let key = CacheKey::root("numbers");
    store.write(&key, json!(5));
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let fetcher: SharedFetcher = Arc::new(move |_key: CacheKey, _token: RequestToken| {
      counter.fetch_add(1, Ordering::SeqCst);
      async { Ok::<_, FetchError>(json!(6)) }
    });

    let mut query: Query<i32> = Query::new(store, key, fetcher);
    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    assert_eq!(query.data(), Some(&5));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!query.is_stale());
  }

  #[tokio::test]
  async fn test_invalidation_triggers_refetch_on_poll() {
    let store = store();
    let key = CacheKey::root("numbers");
    store.write(&key, json!(1));
    let mut query: Query<i32> = Query::new(store.clone(), key.clone(), fetcher_of(json!(2)));
    query.fetch();
    assert_eq!(query.data(), Some(&1));

    store.invalidate(&key);
    query.poll();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(query.poll());
    assert_eq!(query.data(), Some(&2));
  }

  #[tokio::test]
  async fn test_set_key_switches_entries() {
    let store = store();
    let first = CacheKey::new(["issues", "a"]);
    let second = CacheKey::new(["issues", "b"]);
    store.write(&first, json!("a"));
    store.write(&second, json!("b"));

    let mut query: Query<String> = Query::new(store.clone(), first.clone(), fetcher_of(json!("x")));
    query.fetch();
    assert_eq!(store.read(&first).unwrap().observers, 1);

    query.set_key(second.clone());
    assert_eq!(query.data().map(String::as_str), Some("b"));
    assert_eq!(store.read(&first).unwrap().observers, 0);
    assert_eq!(store.read(&second).unwrap().observers, 1);
  }

  #[tokio::test]
  async fn test_shape_mismatch_is_an_error() {
    let store = store();
    let key = CacheKey::root("numbers");
    store.write(&key, json!("not a number"));
    let mut query: Query<i32> = Query::new(store, key, fetcher_of(json!(1)));
    query.fetch();
    assert!(query.is_error());
  }
}
