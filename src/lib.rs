//! Terminal issue browser built on an offline-first query cache.
//!
//! The [`cache`] module is UI-independent: keyed entries with stale-while-
//! revalidate reads, cancellable and retried fetches, optimistic mutations
//! with rollback, and snapshot persistence. [`window`] and [`debounce`] are
//! the list virtualization and input-rate helpers the views use on top.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod event;
pub mod keys;
pub mod query;
pub mod ui;
pub mod window;
