use crate::cache::{CacheStore, FetchError, MutationPlan};
use crate::keys::Resource;

use super::client::ApiClient;
use super::types::Bookmark;

/// Optimistic effect of bookmarking (or un-bookmarking) an issue: the cached
/// bookmark list gains or loses the entry right away. A no-op if the list
/// already agrees.
pub fn bookmark_plan(issue_id: i64, bookmarked: bool) -> MutationPlan {
  MutationPlan::new().update(
    Resource::Bookmarks.key(),
    move |current: Option<Vec<Bookmark>>| {
      let mut bookmarks = current.unwrap_or_default();
      let present = bookmarks.iter().any(|b| b.issue_id == issue_id);
      match (bookmarked, present) {
        (true, false) => bookmarks.push(Bookmark::pending(issue_id)),
        (false, true) => bookmarks.retain(|b| b.issue_id != issue_id),
        _ => return None,
      }
      Some(bookmarks)
    },
  )
}

/// Add or remove a bookmark on the server, updating the cache optimistically.
pub async fn set_bookmarked(
  store: &CacheStore,
  api: &ApiClient,
  issue_id: i64,
  bookmarked: bool,
) -> Result<(), FetchError> {
  store
    .mutate(bookmark_plan(issue_id, bookmarked), issue_id, |id| async move {
      if bookmarked {
        api.add_bookmark(id).await.map(|_| ())
      } else {
        api.remove_bookmark(id).await
      }
    })
    .await
}
