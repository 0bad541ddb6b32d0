//! Optimistic mutations.
//!
//! A mutation runs as a small transaction against the cache:
//!
//! ```text
//! Optimistic --commit--> Confirmed
//!     \------abort----> RolledBack
//! ```
//!
//! `begin_transaction` snapshots every entry a patch touches and applies the
//! patch at once. `commit` marks the touched keys and the plan's invalidation
//! prefixes stale so they refetch in the background. `abort` puts each
//! snapshot back, but only where the entry still carries the revision this
//! transaction wrote; a newer write by someone else wins.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, warn};

use super::error::{ErrorClass, FetchError};
use super::key::CacheKey;
use super::store::{CacheEntry, CacheStore};

type Patch = Box<dyn FnOnce(Option<&Value>) -> Option<Value> + Send>;

/// Declarative description of a mutation's cache effects.
#[derive(Default)]
pub struct MutationPlan {
  patches: Vec<(CacheKey, Patch)>,
  invalidates: Vec<CacheKey>,
}

impl MutationPlan {
  pub fn new() -> Self {
    Self::default()
  }

  /// Optimistically rewrite `key`. The patch receives the cached data (if
  /// any); returning `None` leaves the entry alone.
  pub fn patch<F>(mut self, key: CacheKey, patch: F) -> Self
  where
    F: FnOnce(Option<&Value>) -> Option<Value> + Send + 'static,
  {
    self.patches.push((key, Box::new(patch)));
    self
  }

  /// Typed variant of [`patch`](Self::patch).
  pub fn update<T, F>(self, key: CacheKey, update: F) -> Self
  where
    T: Serialize + DeserializeOwned + 'static,
    F: FnOnce(Option<T>) -> Option<T> + Send + 'static,
  {
    self.patch(key, move |current| {
      let current = match current {
        Some(value) => Some(serde_json::from_value(value.clone()).ok()?),
        None => None,
      };
      serde_json::to_value(update(current)?).ok()
    })
  }

  /// Mark every key under `prefix` stale once the mutation succeeds.
  pub fn invalidates(mut self, prefix: CacheKey) -> Self {
    self.invalidates.push(prefix);
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
  Optimistic,
  Confirmed,
  RolledBack,
}

struct Touched {
  key: CacheKey,
  /// `None` when the entry did not exist before the patch
  previous: Option<CacheEntry>,
  applied_revision: u64,
}

/// An optimistic update waiting for the server's answer.
///
/// Dropping a transaction that was neither committed nor aborted rolls it
/// back.
pub struct Transaction {
  store: CacheStore,
  touched: Vec<Touched>,
  invalidates: Vec<CacheKey>,
  state: MutationState,
}

impl Transaction {
  pub fn state(&self) -> MutationState {
    self.state
  }

  /// Keys patched by this transaction, in application order.
  pub fn touched_keys(&self) -> impl Iterator<Item = &CacheKey> {
    self.touched.iter().map(|t| &t.key)
  }

  /// Accept the optimistic state and schedule refetches. Returns the number
  /// of entries marked stale.
  pub fn commit(mut self) -> usize {
    self.state = MutationState::Confirmed;
    let mut stale: HashSet<CacheKey> = HashSet::new();

    let mut state = self.store.state();
    for touched in &self.touched {
      if let Some(entry) = state.entries.get_mut(&touched.key) {
        entry.invalidated = true;
        stale.insert(touched.key.clone());
      }
    }
    for prefix in &self.invalidates {
      for (key, entry) in state.entries.iter_mut() {
        if key.starts_with(prefix) {
          entry.invalidated = true;
          stale.insert(key.clone());
        }
      }
    }
    debug!(stale = stale.len(), "Mutation confirmed");
    stale.len()
  }

  /// Undo the optimistic patches. Returns the number of entries restored.
  pub fn abort(mut self) -> usize {
    self.rollback()
  }

  fn rollback(&mut self) -> usize {
    self.state = MutationState::RolledBack;
    let now = self.store.now();
    let mut restored = 0;

    // Single lock for the whole rollback; newest patch first
    let mut state = self.store.state();
    for touched in self.touched.iter().rev() {
      let current_revision = match state.entries.get(&touched.key) {
        Some(entry) => entry.revision,
        None => continue,
      };

      if current_revision != touched.applied_revision {
        // Someone wrote after us; keep their data but force a refetch
        debug!(key = %touched.key, "Skipping rollback of overwritten entry");
        if let Some(entry) = state.entries.get_mut(&touched.key) {
          entry.invalidated = true;
        }
        continue;
      }

      match &touched.previous {
        Some(previous) => {
          if let Some(entry) = state.entries.get_mut(&touched.key) {
            entry.data = previous.data.clone();
            entry.status = previous.status;
            entry.updated_at = previous.updated_at;
            entry.error = previous.error.clone();
            // Keep a refetch requested by an overlapping rollback
            entry.invalidated = entry.invalidated || previous.invalidated;
            entry.revision = previous.revision;
          }
        }
        None => {
          let observed = state
            .entries
            .get(&touched.key)
            .is_some_and(|entry| entry.observers > 0);
          if observed {
            state.put_blank(&touched.key, now);
          } else {
            state.entries.remove(&touched.key);
          }
        }
      }
      restored += 1;
    }
    debug!(restored, "Mutation rolled back");
    restored
  }
}

impl Drop for Transaction {
  fn drop(&mut self) {
    if self.state == MutationState::Optimistic {
      self.rollback();
    }
  }
}

impl CacheStore {
  /// Apply the plan's patches and return the open transaction.
  ///
  /// In-flight fetches for patched keys are cancelled so a response that
  /// predates the mutation cannot overwrite the optimistic value.
  pub fn begin_transaction(&self, plan: MutationPlan) -> Transaction {
    let now = self.now();
    let mut touched = Vec::with_capacity(plan.patches.len());

    {
      let mut state = self.state();
      for (key, patch) in plan.patches {
        let previous = state.entries.get(&key).cloned();
        let Some(next) = patch(previous.as_ref().and_then(|entry| entry.data.as_ref())) else {
          continue;
        };
        self.inner.requests.cancel(&key.fingerprint());
        let applied_revision = state.put_success(&key, next, now, now);
        touched.push(Touched {
          key,
          previous,
          applied_revision,
        });
      }
    }

    debug!(touched = touched.len(), "Mutation applied optimistically");
    Transaction {
      store: self.clone(),
      touched,
      invalidates: plan.invalidates,
      state: MutationState::Optimistic,
    }
  }

  /// Run `mutator` with optimistic cache effects.
  ///
  /// The mutator is retried once if it fails with a retryable error. On
  /// success the transaction commits; on failure it rolls back and the error
  /// is returned to the caller.
  pub async fn mutate<I, R, F, Fut>(
    &self,
    plan: MutationPlan,
    input: I,
    mutator: F,
  ) -> Result<R, FetchError>
  where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<R, FetchError>>,
  {
    let transaction = self.begin_transaction(plan);
    let retry = &self.inner.config.retry;

    let result = match mutator(input.clone()).await {
      Err(error) if retry.classify(&error) == ErrorClass::Retryable => {
        warn!(error = %error, "Mutation failed, retrying once");
        tokio::time::sleep(retry.backoff(0)).await;
        mutator(input).await
      }
      other => other,
    };

    match result {
      Ok(value) => {
        transaction.commit();
        Ok(value)
      }
      Err(error) => {
        transaction.abort();
        self.report_auth(&error);
        Err(error)
      }
    }
  }
}
