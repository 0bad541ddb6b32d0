mod issue_detail;
mod issue_list;

pub use issue_detail::IssueDetailView;
pub use issue_list::{load_view_state, save_view_state, IssueListView, ViewState, VIEW_STATE_KEY};
