//! Client-side data synchronization core.
//!
//! This module provides a transport-agnostic query cache that:
//! - Serves cached data immediately and revalidates stale entries in the background
//! - Runs at most one fetch per key, dropping results of superseded requests
//! - Applies optimistic mutations as transactions with commit/abort
//! - Persists a filtered snapshot across runs

pub mod clock;
mod error;
mod key;
mod mutation;
mod persist;
mod request;
mod retry;
mod storage;
mod store;

pub use error::{default_classify, Classifier, ErrorClass, FetchError, StorageError};
pub use key::{CacheKey, KeyError, KeySegment};
pub use mutation::{MutationPlan, MutationState, Transaction};
pub use persist::{
  PersistOptions, PersistedQuery, PersistedSnapshot, PersistedState, Persister, UnloadSignal,
  SNAPSHOT_KEY,
};
pub use request::{RequestCoordinator, RequestToken};
pub use retry::RetryPolicy;
pub use storage::{DurableStorage, MemoryStorage, SqliteStorage};
pub use store::{
  CacheEntry, CacheStore, Ensured, EntryStatus, ErrorHook, FetchHandle, Fetcher, Freshness,
  SharedFetcher, StoreConfig, Subscription,
};
