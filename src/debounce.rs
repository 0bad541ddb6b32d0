//! Trailing-edge debouncing for values and callbacks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Follow `input`, publishing a value only once it has been left alone for
/// `delay`. Every change restarts the wait; intermediate values are never
/// published. Equal consecutive values are not re-announced.
///
/// The returned receiver starts at the current input value.
pub fn debounce_value<T>(mut input: watch::Receiver<T>, delay: Duration) -> watch::Receiver<T>
where
  T: Clone + PartialEq + Send + Sync + 'static,
{
  let (tx, rx) = watch::channel(input.borrow_and_update().clone());

  tokio::spawn(async move {
    loop {
      if input.changed().await.is_err() {
        return;
      }

      // Wait for a quiet period
      let closed = loop {
        tokio::select! {
          biased;
          changed = input.changed() => {
            if changed.is_err() {
              break true;
            }
          }
          _ = tokio::time::sleep(delay) => break false,
        }
      };
      if closed {
        tokio::time::sleep(delay).await;
      }

      let latest = input.borrow_and_update().clone();
      tx.send_if_modified(|current| {
        if *current == latest {
          return false;
        }
        *current = latest;
        true
      });

      if closed || tx.is_closed() {
        return;
      }
    }
  });

  rx
}

type Callback<A> = Arc<dyn Fn(A) + Send + Sync>;

struct Pending<A> {
  callback: Callback<A>,
  args: Option<A>,
  timer: Option<JoinHandle<()>>,
  generation: u64,
}

/// A function call delayed until `delay` passes without another call.
///
/// Only the latest arguments survive. The callback can be swapped at any time;
/// whichever callback is current when the timer fires is the one invoked.
pub struct DebouncedCallback<A> {
  pending: Arc<Mutex<Pending<A>>>,
  delay: Duration,
}

fn lock<A>(pending: &Mutex<Pending<A>>) -> MutexGuard<'_, Pending<A>> {
  pending.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A: Send + 'static> DebouncedCallback<A> {
  pub fn new<F>(delay: Duration, callback: F) -> Self
  where
    F: Fn(A) + Send + Sync + 'static,
  {
    Self {
      pending: Arc::new(Mutex::new(Pending {
        callback: Arc::new(callback),
        args: None,
        timer: None,
        generation: 0,
      })),
      delay,
    }
  }

  /// Schedule a call with `args`, replacing any pending call.
  pub fn call(&self, args: A) {
    let mut pending = lock(&self.pending);
    pending.args = Some(args);
    pending.generation += 1;
    if let Some(timer) = pending.timer.take() {
      timer.abort();
    }

    let generation = pending.generation;
    let shared = Arc::clone(&self.pending);
    let delay = self.delay;
    pending.timer = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let due = {
        let mut pending = lock(&shared);
        if pending.generation != generation {
          return;
        }
        pending.timer = None;
        pending.args.take().map(|args| (Arc::clone(&pending.callback), args))
      };
      if let Some((callback, args)) = due {
        callback(args);
      }
    }));
  }

  /// Run the pending call now. Returns whether there was one.
  pub fn flush(&self) -> bool {
    let due = {
      let mut pending = lock(&self.pending);
      if let Some(timer) = pending.timer.take() {
        timer.abort();
      }
      pending.generation += 1;
      pending.args.take().map(|args| (Arc::clone(&pending.callback), args))
    };
    match due {
      Some((callback, args)) => {
        callback(args);
        true
      }
      None => false,
    }
  }

  /// Drop the pending call without running it. Returns whether there was one.
  pub fn cancel(&self) -> bool {
    let mut pending = lock(&self.pending);
    if let Some(timer) = pending.timer.take() {
      timer.abort();
    }
    pending.generation += 1;
    pending.args.take().is_some()
  }

  /// Replace the callback. A pending call keeps its timer.
  pub fn set_callback<F>(&self, callback: F)
  where
    F: Fn(A) + Send + Sync + 'static,
  {
    lock(&self.pending).callback = Arc::new(callback);
  }

  pub fn is_pending(&self) -> bool {
    lock(&self.pending).args.is_some()
  }
}

impl<A> Drop for DebouncedCallback<A> {
  fn drop(&mut self) {
    if let Some(timer) = lock(&self.pending).timer.take() {
      timer.abort();
    }
  }
}
