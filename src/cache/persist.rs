//! Cache persistence across runs.
//!
//! On shutdown a filtered, size-bounded snapshot of the cache is written to
//! durable storage under [`SNAPSHOT_KEY`]. On startup it is read back once.
//! Nothing here ever fails the caller: a broken or oversized snapshot just
//! means starting with an empty cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::key::CacheKey;
use super::storage::DurableStorage;
use super::store::{CacheStore, EntryStatus};

/// Storage name of the cache snapshot.
pub const SNAPSHOT_KEY: &str = "CACHE_SNAPSHOT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
  /// Milliseconds since the epoch
  pub timestamp: i64,
  pub queries: Vec<PersistedQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQuery {
  pub query_key: CacheKey,
  pub state: PersistedState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
  pub data: Value,
  /// Milliseconds since the epoch
  pub data_updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct PersistOptions {
  /// Only keys whose first segment is listed here are persisted
  pub allow_list: Vec<String>,
  /// Snapshots older than this are discarded on startup
  pub max_age: Duration,
  /// Entries not updated within this window are left out
  pub max_entry_age: Duration,
  /// Upper bound on the serialized query list
  pub max_bytes: usize,
}

impl Default for PersistOptions {
  fn default() -> Self {
    Self {
      allow_list: vec!["issues".to_string(), "bookmarks".to_string()],
      max_age: Duration::from_secs(24 * 60 * 60),
      max_entry_age: Duration::from_secs(30 * 60),
      max_bytes: 1024 * 1024,
    }
  }
}

fn older_than(now: DateTime<Utc>, then: DateTime<Utc>, age: Duration) -> bool {
  match chrono::Duration::from_std(age) {
    Ok(age) => now.signed_duration_since(then) > age,
    Err(_) => false,
  }
}

/// Writes and restores cache snapshots.
pub struct Persister {
  storage: Arc<dyn DurableStorage>,
  options: PersistOptions,
}

impl Persister {
  pub fn new(storage: Arc<dyn DurableStorage>, options: PersistOptions) -> Self {
    Self { storage, options }
  }

  /// Build a snapshot of the entries worth keeping, newest first.
  pub fn snapshot(&self, store: &CacheStore) -> PersistedSnapshot {
    let now = store.now();

    let mut candidates: Vec<(DateTime<Utc>, CacheKey, Value)> = store
      .entries()
      .into_iter()
      .filter(|entry| entry.status == EntryStatus::Success)
      .filter(|entry| {
        entry
          .key
          .first_segment()
          .is_some_and(|family| self.options.allow_list.iter().any(|a| a == family))
      })
      .filter_map(|entry| {
        let updated_at = entry.updated_at?;
        let data = entry.data?;
        if older_than(now, updated_at, self.options.max_entry_age) {
          return None;
        }
        Some((updated_at, entry.key, data))
      })
      .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    let mut queries = Vec::with_capacity(candidates.len());
    let mut size = 0;
    for (updated_at, key, data) in candidates {
      let query = PersistedQuery {
        query_key: key,
        state: PersistedState {
          data,
          data_updated_at: updated_at.timestamp_millis(),
        },
      };
      let encoded = match serde_json::to_vec(&query) {
        Ok(bytes) => bytes.len() + 1,
        Err(e) => {
          warn!(key = %query.query_key, error = %e, "Skipping unserializable cache entry");
          continue;
        }
      };
      if size + encoded > self.options.max_bytes {
        debug!(kept = queries.len(), "Snapshot size limit reached");
        break;
      }
      size += encoded;
      queries.push(query);
    }

    PersistedSnapshot {
      timestamp: now.timestamp_millis(),
      queries,
    }
  }

  /// Snapshot the cache into durable storage. Failures are logged and
  /// swallowed; returns whether the snapshot was written.
  pub fn persist(&self, store: &CacheStore) -> bool {
    let snapshot = self.snapshot(store);
    let count = snapshot.queries.len();

    let encoded = match serde_json::to_string(&snapshot) {
      Ok(encoded) => encoded,
      Err(e) => {
        warn!(error = %e, "Failed to serialize cache snapshot");
        return false;
      }
    };

    match self.storage.set(SNAPSHOT_KEY, &encoded) {
      Ok(()) => {
        info!(queries = count, bytes = encoded.len(), "Persisted cache snapshot");
        true
      }
      Err(e) => {
        warn!(error = %e, "Failed to persist cache snapshot");
        false
      }
    }
  }

  /// Restore the stored snapshot into `store`. Returns the number of entries
  /// restored.
  ///
  /// Entries keep their original timestamps, so anything older than the
  /// stale time is refetched on first use.
  pub fn hydrate(&self, store: &CacheStore) -> usize {
    let raw = match self.storage.get(SNAPSHOT_KEY) {
      Ok(Some(raw)) => raw,
      Ok(None) => return 0,
      Err(e) => {
        warn!(error = %e, "Failed to read cache snapshot");
        return 0;
      }
    };

    let snapshot: PersistedSnapshot = match serde_json::from_str(&raw) {
      Ok(snapshot) => snapshot,
      Err(e) => {
        warn!(error = %e, "Discarding corrupt cache snapshot");
        self.discard();
        return 0;
      }
    };

    let now = store.now();
    let expired = match DateTime::from_timestamp_millis(snapshot.timestamp) {
      Some(taken_at) => older_than(now, taken_at, self.options.max_age),
      None => true,
    };
    if expired {
      info!("Discarding expired cache snapshot");
      self.discard();
      return 0;
    }

    let mut restored = 0;
    for query in snapshot.queries {
      let Some(updated_at) = DateTime::from_timestamp_millis(query.state.data_updated_at) else {
        continue;
      };
      if store.hydrate_entry(&query.query_key, query.state.data, updated_at) {
        restored += 1;
      }
    }
    info!(restored, "Hydrated cache from snapshot");
    restored
  }

  fn discard(&self) {
    if let Err(e) = self.storage.remove(SNAPSHOT_KEY) {
      warn!(error = %e, "Failed to remove cache snapshot");
    }
  }

  /// Persist `store` when `signal` fires.
  pub fn attach(self: &Arc<Self>, signal: &UnloadSignal, store: CacheStore) {
    let persister = Arc::clone(self);
    signal.on_unload(move || {
      persister.persist(&store);
    });
  }
}

type UnloadHook = Box<dyn FnOnce() + Send>;

/// One-shot hook point fired right before the process shuts down.
#[derive(Default)]
pub struct UnloadSignal {
  hooks: Mutex<Vec<UnloadHook>>,
  fired: AtomicBool,
}

impl UnloadSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on_unload<F>(&self, hook: F)
  where
    F: FnOnce() + Send + 'static,
  {
    if self.has_fired() {
      debug!("Unload hook registered after shutdown; ignoring");
      return;
    }
    self
      .hooks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(Box::new(hook));
  }

  /// Run every registered hook. Only the first call does anything.
  pub fn fire(&self) -> usize {
    if self.fired.swap(true, Ordering::SeqCst) {
      return 0;
    }
    let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
    let count = hooks.len();
    for hook in hooks {
      hook();
    }
    count
  }

  pub fn has_fired(&self) -> bool {
    self.fired.load(Ordering::SeqCst)
  }
}
