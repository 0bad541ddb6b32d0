use crate::api::set_bookmarked;
use crate::api::types::{Bookmark, Issue};
use crate::app::AppContext;
use crate::cache::DurableStorage;
use crate::debounce::{debounce_value, DebouncedCallback};
use crate::keys::{IssueFilters, Resource};
use crate::query::{Query, QueryState};
use crate::ui::components::{FilterEvent, FilterInput, KeyResult};
use crate::ui::renderfns::{difficulty_color, truncate};
use crate::ui::view::{Shortcut, View, ViewAction};
use crate::ui::views::IssueDetailView;
use crate::window::{VirtualList, WindowOptions};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Storage key for the remembered list state
pub const VIEW_STATE_KEY: &str = "VIEW_STATE";

const REMEMBER_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
  pub filter: String,
}

pub fn load_view_state(storage: &dyn DurableStorage) -> Option<ViewState> {
  let raw = storage.get(VIEW_STATE_KEY).ok().flatten()?;
  match serde_json::from_str(&raw) {
    Ok(state) => Some(state),
    Err(e) => {
      warn!(error = %e, "Ignoring unreadable view state");
      None
    }
  }
}

pub fn save_view_state(storage: &dyn DurableStorage, state: &ViewState) {
  let result = serde_json::to_string(state)
    .map_err(|e| e.to_string())
    .and_then(|raw| storage.set(VIEW_STATE_KEY, &raw).map_err(|e| e.to_string()));
  match result {
    Ok(()) => debug!(filter = %state.filter, "Saved view state"),
    Err(e) => warn!(error = %e, "Failed to save view state"),
  }
}

/// Windowed, filterable list of issues
pub struct IssueListView {
  ctx: AppContext,
  issues: Query<Vec<Issue>>,
  bookmarks: Query<Vec<Bookmark>>,
  filters: IssueFilters,
  filter: FilterInput,
  filter_tx: watch::Sender<String>,
  debounced_filter: watch::Receiver<String>,
  remember: DebouncedCallback<ViewState>,
  list: VirtualList,
  selected: usize,
}

impl IssueListView {
  pub fn new(ctx: AppContext) -> Self {
    let saved = load_view_state(ctx.storage.as_ref()).unwrap_or_default();
    let filters = IssueFilters::parse(&saved.filter)
      .with_default_difficulty(ctx.config.default_difficulty.as_deref());

    let mut issues = Query::new(
      ctx.store.clone(),
      Resource::IssueList(filters.clone()).key(),
      ctx.api.fetcher(),
    );
    issues.fetch();
    let mut bookmarks = Query::new(ctx.store.clone(), Resource::Bookmarks.key(), ctx.api.fetcher());
    bookmarks.fetch();

    let (filter_tx, raw_filter) = watch::channel(saved.filter.clone());
    let debounced_filter = debounce_value(
      raw_filter,
      Duration::from_millis(ctx.config.ui.filter_debounce_ms),
    );

    let storage = ctx.storage.clone();
    let remember = DebouncedCallback::new(REMEMBER_DELAY, move |state: ViewState| {
      save_view_state(storage.as_ref(), &state)
    });

    let ui = &ctx.config.ui;
    let list = VirtualList::new(
      WindowOptions::new(1.0, 0.0)
        .with_overscan(ui.overscan)
        .with_threshold(ui.virtualization_threshold),
    );

    Self {
      filter: FilterInput::with_value(saved.filter),
      ctx,
      issues,
      bookmarks,
      filters,
      filter_tx,
      debounced_filter,
      remember,
      list,
      selected: 0,
    }
  }

  fn issues(&self) -> &[Issue] {
    self.issues.data().map(|v| v.as_slice()).unwrap_or(&[])
  }

  fn is_bookmarked(&self, issue_id: i64) -> bool {
    self
      .bookmarks
      .data()
      .is_some_and(|list| list.iter().any(|b| b.issue_id == issue_id))
  }

  /// Switch the list to `text`'s filters. The previous list stays cached.
  fn apply_filter(&mut self, text: &str) {
    let filters =
      IssueFilters::parse(text).with_default_difficulty(self.ctx.config.default_difficulty.as_deref());
    if filters == self.filters {
      return;
    }
    debug!(?filters, "Applying filter");
    self.filters = filters;
    self.issues.set_key(Resource::IssueList(self.filters.clone()).key());
    self.select(0);
    self.list.scroll_to_top();
    self.remember.call(ViewState {
      filter: text.to_string(),
    });
  }

  fn select(&mut self, index: usize) {
    let len = self.issues().len();
    self.selected = index.min(len.saturating_sub(1));
  }

  fn page(&self) -> usize {
    (self.list.options().viewport_height as usize).max(1)
  }

  fn toggle_bookmark(&mut self) {
    let Some(issue) = self.issues().get(self.selected) else {
      return;
    };
    let issue_id = issue.id;
    self.bookmarks.poll();
    let bookmarked = !self.is_bookmarked(issue_id);

    let ctx = self.ctx.clone();
    tokio::spawn(async move {
      match set_bookmarked(&ctx.store, &ctx.api, issue_id, bookmarked).await {
        Ok(()) if bookmarked => ctx.status(format!("Bookmarked #{}", issue_id)),
        Ok(()) => ctx.status(format!("Removed bookmark #{}", issue_id)),
        Err(e) => ctx.error(format!("Bookmark #{} failed: {}", issue_id, e)),
      }
    });
  }

  fn title(&self) -> String {
    let count = self.issues().len();
    let position = if count > 0 {
      format!("{}/{}", self.selected + 1, count)
    } else {
      "0".to_string()
    };
    let filter = self.filter.value();
    let label = if filter.is_empty() {
      " Issues".to_string()
    } else {
      format!(" Issues [{}]", filter)
    };

    match self.issues.state() {
      QueryState::Loading => format!("{} (loading...) ", label),
      QueryState::Error(e) => format!("{} (error: {}) ", label, e),
      _ => match self.issues.last_error() {
        Some(e) => format!("{} ({}, refresh failed: {}) ", label, position, e),
        None if self.issues.is_fetching() => format!("{} ({}, refreshing) ", label, position),
        None => format!("{} ({}) ", label, position),
      },
    }
  }

  fn issue_line(&self, issue: &Issue, selected: bool, width: usize) -> Line<'static> {
    let marker = if selected { "> " } else { "  " };
    let star = if self.is_bookmarked(issue.id) { "★ " } else { "  " };
    let difficulty = issue.difficulty.as_deref();
    // marker + star + id + difficulty + language + repository, with spacing
    let fixed = 2 + 2 + 9 + 13 + 11 + 25;
    let title_width = width.saturating_sub(fixed).max(10);

    let line = Line::from(vec![
      Span::raw(marker),
      Span::styled(star, Style::default().fg(Color::Yellow)),
      Span::styled(format!("#{:<8}", issue.id), Style::default().fg(Color::Cyan)),
      Span::styled(
        format!("{:<13}", truncate(difficulty.unwrap_or("-"), 12)),
        Style::default().fg(difficulty_color(difficulty)),
      ),
      Span::styled(
        format!("{:<11}", truncate(issue.language.as_deref().unwrap_or("-"), 10)),
        Style::default().fg(Color::Magenta),
      ),
      Span::styled(
        format!("{:<25}", truncate(&issue.repository, 24)),
        Style::default().fg(Color::DarkGray),
      ),
      Span::raw(truncate(&issue.title, title_width)),
    ]);

    if selected {
      line.style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    } else {
      line
    }
  }
}

impl View for IssueListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match self.filter.handle_key(key) {
      KeyResult::Handled => return ViewAction::None,
      KeyResult::Event(FilterEvent::Changed(text)) => {
        // The debounce task owns the receiver for as long as we own the sender
        let _ = self.filter_tx.send(text);
        return ViewAction::None;
      }
      KeyResult::Event(FilterEvent::Submitted(text) | FilterEvent::Cancelled(text)) => {
        let _ = self.filter_tx.send(text.clone());
        self.apply_filter(&text);
        return ViewAction::None;
      }
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.select(self.selected + 1),
      KeyCode::Char('k') | KeyCode::Up => self.select(self.selected.saturating_sub(1)),
      KeyCode::PageDown => self.select(self.selected + self.page()),
      KeyCode::PageUp => self.select(self.selected.saturating_sub(self.page())),
      KeyCode::Char('g') | KeyCode::Home => {
        self.select(0);
        self.list.scroll_to_top();
      }
      KeyCode::Char('G') | KeyCode::End => {
        self.select(usize::MAX);
        self.list.scroll_to_index(self.selected);
      }
      KeyCode::Enter => {
        if let Some(issue) = self.issues().get(self.selected) {
          let view = IssueDetailView::new(self.ctx.clone(), issue);
          return ViewAction::Push(Box::new(view));
        }
      }
      KeyCode::Char('b') => self.toggle_bookmark(),
      KeyCode::Char('r') => {
        self.issues.refetch();
        self.bookmarks.refetch();
      }
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let block = Block::default()
      .title(self.title())
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    self.list.set_item_count(self.issues().len());
    self.list.set_viewport_height(f64::from(inner.height));
    self.list.scroll_into_view(self.selected);

    if self.issues().is_empty() {
      let message = match self.issues.state() {
        QueryState::Loading | QueryState::Idle => "Loading issues...",
        QueryState::Error(_) => "Failed to load issues. Press 'r' to retry.",
        QueryState::Success(_) => "No issues match this filter.",
      };
      let paragraph = Paragraph::new(message).style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, inner);
    } else {
      let window = self.list.window();
      let top = self.list.scroll_top();
      let rows = f64::from(inner.height);
      let width = usize::from(inner.width);

      // Overscanned rows fall outside the viewport and are skipped
      let lines: Vec<Line> = window
        .items
        .iter()
        .filter(|item| item.offset >= top && item.offset - top < rows)
        .filter_map(|item| {
          let issue = self.issues().get(item.index)?;
          Some(self.issue_line(issue, item.index == self.selected, width))
        })
        .collect();
      frame.render_widget(Paragraph::new(lines), inner);
    }

    self.filter.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    if self.filters.is_empty() {
      "issues".to_string()
    } else {
      format!("issues ({})", self.filter.value())
    }
  }

  fn tick(&mut self) {
    if self.debounced_filter.has_changed().unwrap_or(false) {
      let text = self.debounced_filter.borrow_and_update().clone();
      self.apply_filter(&text);
    }
    self.issues.poll();
    self.bookmarks.poll();
    self.select(self.selected);
  }

  fn on_exit(&mut self) {
    self.remember.flush();
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("/", "filter").with_priority(10),
      Shortcut::new("b", "bookmark").with_priority(20),
      Shortcut::new("r", "refresh").with_priority(25),
      Shortcut::new("q", "quit").with_priority(30),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;

  #[test]
  fn test_view_state_round_trip() {
    let storage = MemoryStorage::new();
    assert_eq!(load_view_state(&storage), None);

    let state = ViewState {
      filter: "lang:rust parser".into(),
    };
    save_view_state(&storage, &state);
    assert_eq!(load_view_state(&storage), Some(state));
  }

  #[test]
  fn test_unreadable_view_state_is_ignored() {
    let storage = MemoryStorage::new();
    storage.set(VIEW_STATE_KEY, "not json").unwrap();
    assert_eq!(load_view_state(&storage), None);
  }
}
