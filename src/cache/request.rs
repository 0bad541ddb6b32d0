//! Named, cancellable in-flight operations.
//!
//! Each operation name owns at most one slot. `begin` bumps the slot to a new
//! generation and cancels the previous token, so a late response from an older
//! request can always be recognised and dropped before it reaches the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle given to a fetch so it can observe cancellation.
#[derive(Debug, Clone)]
pub struct RequestToken {
  name: Arc<str>,
  generation: u64,
  cancel: CancellationToken,
}

impl RequestToken {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Resolves once the token is cancelled.
  pub async fn cancelled(&self) {
    self.cancel.cancelled().await
  }
}

struct InFlight {
  generation: u64,
  cancel: CancellationToken,
  started_at: Instant,
}

/// Tracks one in-flight operation per name.
#[derive(Default)]
pub struct RequestCoordinator {
  slots: Mutex<HashMap<String, InFlight>>,
  next_generation: AtomicU64,
}

impl RequestCoordinator {
  pub fn new() -> Self {
    Self::default()
  }

  fn slots(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Start a new operation, cancelling any previous one with the same name.
  pub fn begin(&self, name: &str) -> RequestToken {
    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
    let cancel = CancellationToken::new();

    let previous = self.slots().insert(
      name.to_string(),
      InFlight {
        generation,
        cancel: cancel.clone(),
        started_at: Instant::now(),
      },
    );
    if let Some(previous) = previous {
      debug!(operation = name, superseded = previous.generation, "Superseding request");
      previous.cancel.cancel();
    }

    RequestToken {
      name: Arc::from(name),
      generation,
      cancel,
    }
  }

  /// Cancel the operation running under `name`, if any.
  pub fn cancel(&self, name: &str) -> bool {
    match self.slots().remove(name) {
      Some(slot) => {
        debug!(operation = name, generation = slot.generation, "Cancelling request");
        slot.cancel.cancel();
        true
      }
      None => false,
    }
  }

  /// Cancel every tracked operation (view teardown, logout).
  pub fn cancel_all(&self) -> usize {
    let drained: Vec<InFlight> = self.slots().drain().map(|(_, slot)| slot).collect();
    for slot in &drained {
      slot.cancel.cancel();
    }
    drained.len()
  }

  /// Whether `token` still owns its slot. Results from a token that is not
  /// current must be discarded.
  pub fn is_current(&self, token: &RequestToken) -> bool {
    if token.is_cancelled() {
      return false;
    }
    self
      .slots()
      .get(token.name())
      .is_some_and(|slot| slot.generation == token.generation)
  }

  /// Release the slot once the operation settles. No-op if a newer request
  /// already took it over.
  pub fn finish(&self, token: &RequestToken) {
    let mut slots = self.slots();
    if slots
      .get(token.name())
      .is_some_and(|slot| slot.generation == token.generation)
    {
      if let Some(slot) = slots.remove(token.name()) {
        debug!(
          operation = token.name(),
          elapsed_ms = slot.started_at.elapsed().as_millis() as u64,
          "Request settled"
        );
      }
    }
  }

  pub fn is_in_flight(&self, name: &str) -> bool {
    self.slots().contains_key(name)
  }

  pub fn in_flight(&self) -> usize {
    self.slots().len()
  }
}
