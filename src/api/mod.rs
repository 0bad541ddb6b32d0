//! HTTP access to the issue API.

mod bookmarks;
mod client;
pub mod types;

pub use bookmarks::{bookmark_plan, set_bookmarked};
pub use client::{status_error, ApiClient};
