//! In-memory query cache with stale-while-revalidate semantics.
//!
//! `CacheStore` is a cheap, cloneable handle to a single shared cache. It is
//! built once at startup and handed to every view and query. All state lives
//! behind one mutex that is never held across an `.await`, so every cache
//! mutation completes within the caller's turn.
//!
//! Reads never block on the network: `ensure_fresh` returns whatever is cached
//! and, when the entry is missing or stale, starts a background fetch through
//! the [`RequestCoordinator`]. A fetch only commits if its token is still the
//! current one for its key.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::error::{ErrorClass, FetchError};
use super::key::CacheKey;
use super::request::{RequestCoordinator, RequestToken};
use super::retry::RetryPolicy;

/// Loads the data behind a cache key.
///
/// The token is cancelled when a newer request for the same key supersedes
/// this one; implementations should stop work when it fires.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, key: &CacheKey, token: RequestToken)
    -> BoxFuture<'static, Result<Value, FetchError>>;
}

impl<F, Fut> Fetcher for F
where
  F: Fn(CacheKey, RequestToken) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
  fn fetch(
    &self,
    key: &CacheKey,
    token: RequestToken,
  ) -> BoxFuture<'static, Result<Value, FetchError>> {
    Box::pin(self(key.clone(), token))
  }
}

pub type SharedFetcher = Arc<dyn Fetcher>;

/// Called with every authorization failure.
pub type ErrorHook = Arc<dyn Fn(&FetchError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  Pending,
  Success,
  Error,
}

/// A single cached query result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: CacheKey,
  pub data: Option<Value>,
  pub status: EntryStatus,
  /// Set on every successful write
  pub updated_at: Option<DateTime<Utc>>,
  pub error: Option<FetchError>,
  /// Forced stale by an invalidation, regardless of age
  pub invalidated: bool,
  /// Bumped on every write; used to detect overlapping optimistic updates
  pub revision: u64,
  /// Number of live subscriptions
  pub observers: usize,
  pub created_at: DateTime<Utc>,
}

impl CacheEntry {
  fn new(key: CacheKey, now: DateTime<Utc>) -> Self {
    Self {
      key,
      data: None,
      status: EntryStatus::Pending,
      updated_at: None,
      error: None,
      invalidated: false,
      revision: 0,
      observers: 0,
      created_at: now,
    }
  }

  /// `updated_at + stale_time`, if the entry ever succeeded.
  pub fn stale_after(&self, stale_time: Duration) -> Option<DateTime<Utc>> {
    let stale_time = chrono::Duration::from_std(stale_time).ok()?;
    self.updated_at?.checked_add_signed(stale_time)
  }

  pub fn is_fresh(&self, now: DateTime<Utc>, stale_time: Duration) -> bool {
    if self.invalidated || self.updated_at.is_none() {
      return false;
    }
    // An unrepresentable deadline is treated as never going stale
    self.stale_after(stale_time).map_or(true, |at| now < at)
  }

  fn last_touched(&self) -> DateTime<Utc> {
    self.updated_at.unwrap_or(self.created_at)
  }
}

/// How `ensure_fresh` found the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  Fresh,
  Stale,
  /// No data cached yet
  Missing,
}

/// Handle to a background fetch.
#[derive(Debug)]
pub struct FetchHandle(JoinHandle<()>);

impl FetchHandle {
  /// Wait until the fetch has committed, failed, or been dropped.
  pub async fn settled(self) {
    let _ = self.0.await;
  }
}

/// Result of `ensure_fresh`: whatever is cached right now, plus the fetch
/// started to refresh it, if any.
#[derive(Debug)]
pub struct Ensured {
  pub data: Option<Value>,
  pub freshness: Freshness,
  pub fetch: Option<FetchHandle>,
}

#[derive(Clone)]
pub struct StoreConfig {
  /// Default stale time for queries
  pub stale_time: Duration,
  /// Unused entries older than this are garbage collected
  pub gc_time: Duration,
  pub retry: RetryPolicy,
  pub on_auth_error: Option<ErrorHook>,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(5 * 60),
      gc_time: Duration::from_secs(10 * 60),
      retry: RetryPolicy::default(),
      on_auth_error: None,
    }
  }
}

pub(super) struct State {
  pub(super) entries: HashMap<CacheKey, CacheEntry>,
  last_revision: u64,
}

impl State {
  fn next_revision(&mut self) -> u64 {
    self.last_revision += 1;
    self.last_revision
  }

  pub(super) fn put_success(
    &mut self,
    key: &CacheKey,
    data: Value,
    updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> u64 {
    let revision = self.next_revision();
    let entry = self
      .entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone(), now));
    entry.data = Some(data);
    entry.status = EntryStatus::Success;
    entry.updated_at = Some(updated_at);
    entry.error = None;
    entry.invalidated = false;
    entry.revision = revision;
    revision
  }

  fn put_error(&mut self, key: &CacheKey, error: FetchError, now: DateTime<Utc>) -> u64 {
    let revision = self.next_revision();
    let entry = self
      .entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone(), now));
    // Last known good data stays visible
    entry.status = EntryStatus::Error;
    entry.error = Some(error);
    entry.revision = revision;
    revision
  }

  /// Reset an entry to "never loaded" under a new revision.
  pub(super) fn put_blank(&mut self, key: &CacheKey, now: DateTime<Utc>) {
    let revision = self.next_revision();
    if let Some(entry) = self.entries.get_mut(key) {
      let observers = entry.observers;
      *entry = CacheEntry::new(key.clone(), now);
      entry.observers = observers;
      entry.revision = revision;
    }
  }
}

pub(super) struct StoreInner {
  state: Mutex<State>,
  pub(super) requests: RequestCoordinator,
  clock: Arc<dyn Clock>,
  pub(super) config: StoreConfig,
}

/// Shared query cache handle.
#[derive(Clone)]
pub struct CacheStore {
  pub(super) inner: Arc<StoreInner>,
}

impl CacheStore {
  pub fn new(config: StoreConfig) -> Self {
    Self::with_clock(config, Arc::new(SystemClock))
  }

  pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Arc::new(StoreInner {
        state: Mutex::new(State {
          entries: HashMap::new(),
          last_revision: 0,
        }),
        requests: RequestCoordinator::new(),
        clock,
        config,
      }),
    }
  }

  pub(super) fn state(&self) -> MutexGuard<'_, State> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.inner.clock.now()
  }

  pub fn config(&self) -> &StoreConfig {
    &self.inner.config
  }

  pub fn requests(&self) -> &RequestCoordinator {
    &self.inner.requests
  }

  /// Look up an entry without side effects.
  pub fn read(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.state().entries.get(key).cloned()
  }

  /// All entries, in no particular order.
  pub fn entries(&self) -> Vec<CacheEntry> {
    self.state().entries.values().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.state().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Store fresh data for `key`. Returns the new revision.
  pub fn write(&self, key: &CacheKey, data: Value) -> u64 {
    let now = self.now();
    self.state().put_success(key, data, now, now)
  }

  /// Store data with an explicit timestamp, keeping any newer entry.
  /// Used when rehydrating persisted data.
  pub fn hydrate_entry(&self, key: &CacheKey, data: Value, updated_at: DateTime<Utc>) -> bool {
    let now = self.now();
    let mut state = self.state();
    let newer_exists = state
      .entries
      .get(key)
      .and_then(|entry| entry.updated_at)
      .is_some_and(|existing| existing >= updated_at);
    if newer_exists {
      return false;
    }
    state.put_success(key, data, updated_at, now);
    true
  }

  /// Record a failure for `key`, keeping previously cached data.
  pub fn write_error(&self, key: &CacheKey, error: FetchError) -> u64 {
    let now = self.now();
    self.state().put_error(key, error, now)
  }

  /// Serialize and store typed data.
  pub fn set_query_data<T: Serialize>(&self, key: &CacheKey, data: &T) -> Result<u64, FetchError> {
    let value = serde_json::to_value(data)?;
    Ok(self.write(key, value))
  }

  /// Typed view of the cached data. `None` if missing or of another shape.
  pub fn query_data<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
    let data = self.read(key)?.data?;
    match serde_json::from_value(data) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(key = %key, error = %e, "Cached data has unexpected shape");
        None
      }
    }
  }

  /// Mark every entry under `prefix` stale. Returns the number marked.
  pub fn invalidate(&self, prefix: &CacheKey) -> usize {
    let mut state = self.state();
    let mut count = 0;
    for (key, entry) in state.entries.iter_mut() {
      if key.starts_with(prefix) {
        entry.invalidated = true;
        count += 1;
      }
    }
    debug!(prefix = %prefix, count, "Invalidated entries");
    count
  }

  pub fn is_fetching(&self, key: &CacheKey) -> bool {
    self.inner.requests.is_in_flight(&key.fingerprint())
  }

  /// Return cached data immediately and refresh it in the background when it
  /// is missing or older than `stale_time`.
  ///
  /// At most one fetch runs per key: if one is already in flight, no new
  /// fetch is started.
  pub fn ensure_fresh(
    &self,
    key: &CacheKey,
    stale_time: Duration,
    fetcher: SharedFetcher,
  ) -> Ensured {
    let now = self.now();
    let name = key.fingerprint();
    let mut state = self.state();

    let existing = state
      .entries
      .get(key)
      .map(|entry| (entry.is_fresh(now, stale_time), entry.data.clone()));
    let data = match existing {
      Some((true, data)) => {
        return Ensured {
          data,
          freshness: Freshness::Fresh,
          fetch: None,
        }
      }
      Some((false, data)) => data,
      None => {
        state
          .entries
          .insert(key.clone(), CacheEntry::new(key.clone(), now));
        None
      }
    };
    let freshness = if data.is_some() {
      Freshness::Stale
    } else {
      Freshness::Missing
    };

    if self.inner.requests.is_in_flight(&name) {
      return Ensured {
        data,
        freshness,
        fetch: None,
      };
    }

    let token = self.inner.requests.begin(&name);
    drop(state);

    debug!(key = %key, ?freshness, "Starting background fetch");
    Ensured {
      data,
      freshness,
      fetch: Some(self.spawn_fetch(key.clone(), token, fetcher)),
    }
  }

  /// Fetch `key` now, superseding any fetch already in flight for it.
  pub fn refetch(&self, key: &CacheKey, fetcher: SharedFetcher) -> FetchHandle {
    let now = self.now();
    let token = {
      let mut state = self.state();
      state
        .entries
        .entry(key.clone())
        .or_insert_with(|| CacheEntry::new(key.clone(), now));
      self.inner.requests.begin(&key.fingerprint())
    };
    debug!(key = %key, "Forced refetch");
    self.spawn_fetch(key.clone(), token, fetcher)
  }

  fn spawn_fetch(&self, key: CacheKey, token: RequestToken, fetcher: SharedFetcher) -> FetchHandle {
    let store = self.clone();
    FetchHandle(tokio::spawn(async move {
      store.run_fetch(key, token, fetcher).await;
    }))
  }

  async fn run_fetch(&self, key: CacheKey, token: RequestToken, fetcher: SharedFetcher) {
    let retry = &self.inner.config.retry;
    let mut attempt = 0;

    loop {
      let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(FetchError::Aborted),
        result = fetcher.fetch(&key, token.clone()) => result,
      };

      let error = match result {
        Ok(data) => {
          self.settle(&key, &token, Ok(data));
          return;
        }
        Err(error) => error,
      };

      if retry.classify(&error) == ErrorClass::Aborted {
        debug!(key = %key, "Fetch aborted");
        self.abandon(&key, &token);
        return;
      }

      if !retry.should_retry(attempt, &error) {
        self.settle(&key, &token, Err(error));
        return;
      }

      let delay = retry.backoff(attempt);
      warn!(key = %key, attempt, ?delay, error = %error, "Fetch failed, retrying");
      tokio::select! {
        biased;
        _ = token.cancelled() => {
          self.inner.requests.finish(&token);
          return;
        }
        _ = tokio::time::sleep(delay) => {}
      }
      attempt += 1;
    }
  }

  /// Release the slot of a fetch that gave up without a result.
  ///
  /// If the fetcher aborted on its own and the entry still has nothing to
  /// show, the entry is marked invalidated so the next poll tries again.
  fn abandon(&self, key: &CacheKey, token: &RequestToken) {
    let mut state = self.state();
    if self.inner.requests.is_current(token) {
      if let Some(entry) = state.entries.get_mut(key) {
        if entry.data.is_none() && entry.status == EntryStatus::Pending {
          entry.invalidated = true;
        }
      }
    }
    self.inner.requests.finish(token);
  }

  /// Commit the outcome of a fetch started with `token`.
  ///
  /// Returns `false` and leaves the cache untouched when the token has been
  /// cancelled or superseded.
  pub fn settle(
    &self,
    key: &CacheKey,
    token: &RequestToken,
    result: Result<Value, FetchError>,
  ) -> bool {
    let now = self.now();
    let auth_failure = {
      let mut state = self.state();
      if !self.inner.requests.is_current(token) {
        debug!(key = %key, generation = token.generation(), "Dropping superseded result");
        return false;
      }
      let auth_failure = match result {
        Ok(data) => {
          state.put_success(key, data, now, now);
          None
        }
        Err(error) => {
          debug!(key = %key, error = %error, "Fetch failed");
          let auth = matches!(error, FetchError::Auth(_)).then(|| error.clone());
          state.put_error(key, error, now);
          auth
        }
      };
      self.inner.requests.finish(token);
      auth_failure
    };

    if let Some(error) = auth_failure {
      self.report_auth(&error);
    }
    true
  }

  pub(super) fn report_auth(&self, error: &FetchError) {
    if let (FetchError::Auth(_), Some(hook)) = (error, &self.inner.config.on_auth_error) {
      hook(error);
    }
  }

  /// Register an observer for `key`; the entry is protected from GC while
  /// the returned guard is alive.
  pub fn subscribe(&self, key: &CacheKey) -> Subscription {
    let now = self.now();
    let mut state = self.state();
    let entry = state
      .entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone(), now));
    entry.observers += 1;
    Subscription {
      store: self.clone(),
      key: key.clone(),
    }
  }

  /// Drop entries untouched for longer than `max_age` that nobody observes
  /// and nothing is fetching. Returns the number removed.
  pub fn gc(&self, max_age: Duration) -> usize {
    let Ok(max_age) = chrono::Duration::from_std(max_age) else {
      return 0;
    };
    let Some(cutoff) = self.now().checked_sub_signed(max_age) else {
      return 0;
    };

    let mut state = self.state();
    let before = state.entries.len();
    let requests = &self.inner.requests;
    state.entries.retain(|key, entry| {
      entry.observers > 0
        || entry.last_touched() >= cutoff
        || requests.is_in_flight(&key.fingerprint())
    });
    let removed = before - state.entries.len();
    if removed > 0 {
      debug!(removed, "Garbage collected cache entries");
    }
    removed
  }

  /// Run `gc(gc_time)` every `interval` until the task is aborted.
  pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
    let store = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
      ticker.tick().await;
      loop {
        ticker.tick().await;
        store.gc(store.inner.config.gc_time);
      }
    })
  }

  /// Cancel everything and forget all entries (logout).
  pub fn clear(&self) {
    let mut state = self.state();
    let cancelled = self.inner.requests.cancel_all();
    let removed = state.entries.len();
    state.entries.clear();
    debug!(cancelled, removed, "Cache cleared");
  }
}

/// Observer guard returned by [`CacheStore::subscribe`].
pub struct Subscription {
  store: CacheStore,
  key: CacheKey,
}

impl Subscription {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(entry) = self.store.state().entries.get_mut(&self.key) {
      entry.observers = entry.observers.saturating_sub(1);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
  }

  fn store_with_clock() -> (CacheStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let config = StoreConfig {
      retry: RetryPolicy::none(),
      ..StoreConfig::default()
    };
    (CacheStore::with_clock(config, clock.clone()), clock)
  }

  fn counting_fetcher(counter: Arc<AtomicU32>, value: Value) -> SharedFetcher {
    Arc::new(move |_key: CacheKey, _token: RequestToken| {
      let counter = counter.clone();
      let value = value.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, FetchError>(value)
      }
    })
  }

  #[test]
  fn test_write_then_read() {
    let (store, _) = store_with_clock();
    let key = CacheKey::new(["issues", "list"]);
    store.write(&key, json!([1, 2, 3]));

    let entry = store.read(&key).unwrap();
    assert_eq!(entry.status, EntryStatus::Success);
    assert_eq!(entry.data, Some(json!([1, 2, 3])));
    assert_eq!(entry.updated_at, Some(start()));
    assert!(entry.error.is_none());
  }

  #[test]
  fn test_write_error_keeps_data() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("bookmarks");
    store.write(&key, json!(["a"]));
    store.write_error(&key, FetchError::Network("offline".into()));

    let entry = store.read(&key).unwrap();
    assert_eq!(entry.status, EntryStatus::Error);
    assert_eq!(entry.data, Some(json!(["a"])));
    assert_eq!(entry.error, Some(FetchError::Network("offline".into())));

    store.write(&key, json!(["b"]));
    assert!(store.read(&key).unwrap().error.is_none());
  }

  #[test]
  fn test_write_error_without_data() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("profile");
    store.write_error(&key, FetchError::NotFound("profile".into()));
    let entry = store.read(&key).unwrap();
    assert_eq!(entry.status, EntryStatus::Error);
    assert!(entry.data.is_none());
  }

  #[test]
  fn test_staleness_by_age() {
    let (store, clock) = store_with_clock();
    let key = CacheKey::root("issues");
    store.write(&key, json!(1));
    let stale_time = Duration::from_secs(60);

    assert!(store.read(&key).unwrap().is_fresh(clock.now(), stale_time));
    clock.advance(chrono::Duration::seconds(61));
    let entry = store.read(&key).unwrap();
    assert!(!entry.is_fresh(clock.now(), stale_time));
    // Stale entries stay in the cache
    assert_eq!(entry.data, Some(json!(1)));
  }

  #[tokio::test]
  async fn test_ensure_fresh_hit_does_not_fetch() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("issues");
    store.write(&key, json!("cached"));
    let counter = Arc::new(AtomicU32::new(0));

    let ensured = store.ensure_fresh(
      &key,
      Duration::from_secs(60),
      counting_fetcher(counter.clone(), json!("new")),
    );
    assert_eq!(ensured.freshness, Freshness::Fresh);
    assert_eq!(ensured.data, Some(json!("cached")));
    assert!(ensured.fetch.is_none());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_ensure_fresh_stale_returns_old_data_and_refreshes() {
    let (store, clock) = store_with_clock();
    let key = CacheKey::root("issues");
    store.write(&key, json!("old"));
    clock.advance(chrono::Duration::minutes(10));
    let counter = Arc::new(AtomicU32::new(0));

    let ensured = store.ensure_fresh(
      &key,
      Duration::from_secs(60),
      counting_fetcher(counter.clone(), json!("new")),
    );
    assert_eq!(ensured.freshness, Freshness::Stale);
    assert_eq!(ensured.data, Some(json!("old")));

    ensured.fetch.unwrap().settled().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(store.read(&key).unwrap().data, Some(json!("new")));
    assert!(!store.is_fetching(&key));
  }

  #[tokio::test]
  async fn test_ensure_fresh_dedupes_in_flight() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("issues");
    let counter = Arc::new(AtomicU32::new(0));
    let release = Arc::new(tokio::sync::Notify::new());

    let fetcher: SharedFetcher = {
      let counter = counter.clone();
      let release = release.clone();
      Arc::new(move |_key: CacheKey, _token: RequestToken| {
        let counter = counter.clone();
        let release = release.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          release.notified().await;
          Ok::<_, FetchError>(json!("done"))
        }
      })
    };

    let first = store.ensure_fresh(&key, Duration::from_secs(60), fetcher.clone());
    assert_eq!(first.freshness, Freshness::Missing);
    let second = store.ensure_fresh(&key, Duration::from_secs(60), fetcher.clone());
    assert!(second.fetch.is_none());

    tokio::task::yield_now().await;
    release.notify_one();
    first.fetch.unwrap().settled().await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(store.read(&key).unwrap().data, Some(json!("done")));
  }

  #[test]
  fn test_cancelled_token_cannot_write() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("issues");
    let name = key.fingerprint();
    let first = store.requests().begin(&name);
    let second = store.requests().begin(&name);
    assert!(first.is_cancelled());

    assert!(store.settle(&key, &second, Ok(json!("newer"))));
    assert!(!store.settle(&key, &first, Ok(json!("older"))));
    assert_eq!(store.read(&key).unwrap().data, Some(json!("newer")));
  }

  #[tokio::test]
  async fn test_refetch_supersedes_slow_request() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("issues");
    let calls = Arc::new(AtomicU32::new(0));

    let fetcher: SharedFetcher = {
      let calls = calls.clone();
      Arc::new(move |_key: CacheKey, _token: RequestToken| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          if call == 0 {
            // Slow first request, overtaken by the refetch
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, FetchError>(json!("first"))
          } else {
            Ok(json!("second"))
          }
        }
      })
    };

    let first = store
      .ensure_fresh(&key, Duration::from_secs(60), fetcher.clone())
      .fetch
      .unwrap();
    tokio::task::yield_now().await;
    let second = store.refetch(&key, fetcher);
    second.settled().await;
    first.settled().await;

    assert_eq!(store.read(&key).unwrap().data, Some(json!("second")));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_network_errors_with_backoff() {
    let clock = Arc::new(ManualClock::new(start()));
    let config = StoreConfig {
      retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(30)),
      ..StoreConfig::default()
    };
    let store = CacheStore::with_clock(config, clock);
    let key = CacheKey::root("issues");
    let calls = Arc::new(AtomicU32::new(0));

    let fetcher: SharedFetcher = {
      let calls = calls.clone();
      Arc::new(move |_key: CacheKey, _token: RequestToken| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          if call < 2 {
            Err(FetchError::Network("connection reset".into()))
          } else {
            Ok(json!("recovered"))
          }
        }
      })
    };

    let ensured = store.ensure_fresh(&key, Duration::from_secs(60), fetcher);
    ensured.fetch.unwrap().settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.read(&key).unwrap().data, Some(json!("recovered")));
  }

  #[tokio::test(start_paused = true)]
  async fn test_non_retryable_fails_immediately() {
    let clock = Arc::new(ManualClock::new(start()));
    let seen = Arc::new(AtomicU32::new(0));
    let hook_seen = seen.clone();
    let config = StoreConfig {
      on_auth_error: Some(Arc::new(move |_e: &FetchError| {
        hook_seen.fetch_add(1, Ordering::SeqCst);
      })),
      ..StoreConfig::default()
    };
    let store = CacheStore::with_clock(config, clock);
    let key = CacheKey::root("profile");
    let calls = Arc::new(AtomicU32::new(0));

    let fetcher: SharedFetcher = {
      let calls = calls.clone();
      Arc::new(move |_key: CacheKey, _token: RequestToken| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Err::<Value, _>(FetchError::Auth("token expired".into())) }
      })
    };

    store
      .ensure_fresh(&key, Duration::from_secs(60), fetcher)
      .fetch
      .unwrap()
      .settled()
      .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    let entry = store.read(&key).unwrap();
    assert_eq!(entry.status, EntryStatus::Error);
    assert!(matches!(entry.error, Some(FetchError::Auth(_))));
  }

  #[tokio::test]
  async fn test_aborted_fetch_writes_nothing() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("issues");
    store.write(&key, json!("kept"));
    store.invalidate(&key);

    let fetcher: SharedFetcher =
      Arc::new(|_key: CacheKey, _token: RequestToken| async { Err::<Value, _>(FetchError::Aborted) });
    store
      .ensure_fresh(&key, Duration::from_secs(60), fetcher)
      .fetch
      .unwrap()
      .settled()
      .await;

    let entry = store.read(&key).unwrap();
    assert_eq!(entry.status, EntryStatus::Success);
    assert_eq!(entry.data, Some(json!("kept")));
    assert!(!store.is_fetching(&key));
  }

  #[tokio::test]
  async fn test_fetcher_abort_without_data_is_retried_on_next_read() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("issues");
    let aborting: SharedFetcher =
      Arc::new(|_key: CacheKey, _token: RequestToken| async { Err::<Value, _>(FetchError::Aborted) });
    store
      .ensure_fresh(&key, Duration::from_secs(60), aborting)
      .fetch
      .unwrap()
      .settled()
      .await;

    let entry = store.read(&key).unwrap();
    assert!(entry.data.is_none());
    assert!(entry.invalidated);
    assert!(!store.is_fetching(&key));

    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = counting_fetcher(calls.clone(), json!([1]));
    let ensured = store.ensure_fresh(&key, Duration::from_secs(60), fetcher);
    ensured.fetch.unwrap().settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.read(&key).unwrap().data, Some(json!([1])));
  }

  #[test]
  fn test_invalidate_by_prefix() {
    let (store, clock) = store_with_clock();
    store.write(&CacheKey::new(["issues", "list"]), json!([]));
    store.write(&CacheKey::new(["issues", "detail"]), json!({}));
    store.write(&CacheKey::root("bookmarks"), json!([]));

    assert_eq!(store.invalidate(&CacheKey::root("issues")), 2);
    let hour = Duration::from_secs(3600);
    let list = store.read(&CacheKey::new(["issues", "list"])).unwrap();
    assert!(!list.is_fresh(clock.now(), hour));
    let bookmarks = store.read(&CacheKey::root("bookmarks")).unwrap();
    assert!(bookmarks.is_fresh(clock.now(), hour));
  }

  #[test]
  fn test_gc_respects_age_and_observers() {
    let (store, clock) = store_with_clock();
    let watched = CacheKey::root("watched");
    let old = CacheKey::root("old");
    store.write(&watched, json!(1));
    store.write(&old, json!(2));
    let subscription = store.subscribe(&watched);

    clock.advance(chrono::Duration::minutes(30));
    let recent = CacheKey::root("recent");
    store.write(&recent, json!(3));

    assert_eq!(store.gc(Duration::from_secs(10 * 60)), 1);
    assert!(store.read(&old).is_none());
    assert!(store.read(&watched).is_some());
    assert!(store.read(&recent).is_some());

    drop(subscription);
    assert_eq!(store.read(&watched).unwrap().observers, 0);
    assert_eq!(store.gc(Duration::from_secs(10 * 60)), 1);
    assert!(store.read(&watched).is_none());
  }

  #[test]
  fn test_typed_helpers() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("bookmarks");
    store.set_query_data(&key, &vec![1u64, 2, 3]).unwrap();
    assert_eq!(store.query_data::<Vec<u64>>(&key), Some(vec![1, 2, 3]));
    assert_eq!(store.query_data::<String>(&key), None);
  }

  #[test]
  fn test_clear_cancels_and_empties() {
    let (store, _) = store_with_clock();
    let key = CacheKey::root("issues");
    store.write(&key, json!(1));
    let token = store.requests().begin(&key.fingerprint());

    store.clear();
    assert!(store.is_empty());
    assert!(token.is_cancelled());
    assert!(!store.settle(&key, &token, Ok(json!(2))));
    assert!(store.read(&key).is_none());
  }
}
