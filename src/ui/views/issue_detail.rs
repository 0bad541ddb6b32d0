use crate::api::types::Issue;
use crate::app::AppContext;
use crate::keys::Resource;
use crate::query::{Query, QueryState};
use crate::ui::renderfns::difficulty_color;
use crate::ui::view::{Shortcut, View, ViewAction};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

/// Detail pane for one issue
///
/// Shows the list row it was opened from until the detail query has data,
/// so the header never flashes empty.
pub struct IssueDetailView {
  preview: Issue,
  query: Query<Issue>,
  scroll: u16,
}

impl IssueDetailView {
  pub fn new(ctx: AppContext, preview: &Issue) -> Self {
    let key = Resource::IssueDetail { id: preview.id }.key();
    let mut query = Query::new(ctx.store.clone(), key, ctx.api.fetcher());
    query.fetch();

    Self {
      preview: preview.clone(),
      query,
      scroll: 0,
    }
  }

  fn issue(&self) -> &Issue {
    self.query.data().unwrap_or(&self.preview)
  }

  fn render_detail(&self, frame: &mut Frame, area: Rect) {
    let id = self.preview.id;
    let title = match self.query.state() {
      QueryState::Loading => format!(" #{} (loading...) ", id),
      QueryState::Error(e) => format!(" #{} (error: {}) ", id, e),
      _ => match self.query.last_error() {
        Some(e) => format!(" #{} (refresh failed: {}) ", id, e),
        None => format!(" #{} ", id),
      },
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let issue = self.issue();
    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([
        Constraint::Length(5), // Title, repository, difficulty, labels, url
        Constraint::Length(1), // Separator
        Constraint::Min(1),    // Body
      ])
      .split(inner);

    let label = Style::default().fg(Color::DarkGray);
    let difficulty = issue.difficulty.as_deref();
    let updated = issue
      .updated_at
      .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
      .unwrap_or_else(|| "-".to_string());
    let header = vec![
      Line::from(Span::styled(issue.title.as_str(), Style::default().bold())),
      Line::from(vec![
        Span::styled("Repository: ", label),
        Span::raw(issue.repository.as_str()),
        Span::raw("  "),
        Span::styled("Updated: ", label),
        Span::raw(updated),
      ]),
      Line::from(vec![
        Span::styled("Difficulty: ", label),
        Span::styled(
          difficulty.unwrap_or("-"),
          Style::default().fg(difficulty_color(difficulty)),
        ),
        Span::raw("  "),
        Span::styled("Language: ", label),
        Span::styled(
          issue.language.as_deref().unwrap_or("-"),
          Style::default().fg(Color::Magenta),
        ),
        Span::raw("  "),
        Span::styled("Comments: ", label),
        Span::raw(issue.comments.to_string()),
      ]),
      Line::from(vec![
        Span::styled("Labels: ", label),
        Span::styled(issue.labels.join(", "), Style::default().fg(Color::Yellow)),
      ]),
      Line::from(vec![
        Span::styled("Url: ", label),
        Span::styled(issue.url.as_str(), Style::default().fg(Color::Cyan)),
      ]),
    ];
    frame.render_widget(Paragraph::new(header), chunks[0]);

    let sep = Paragraph::new("─".repeat(usize::from(chunks[1].width))).style(label);
    frame.render_widget(sep, chunks[1]);

    let body = match (&issue.body, self.query.state()) {
      (Some(body), _) => Paragraph::new(body.as_str()),
      (None, QueryState::Loading) => Paragraph::new("Loading description...").style(label),
      (None, QueryState::Error(e)) => {
        Paragraph::new(format!("Error: {}\n\nPress 'r' to retry.", e)).style(Style::default().fg(Color::Red))
      }
      (None, _) => Paragraph::new("No description").style(label),
    };
    frame.render_widget(
      body.wrap(Wrap { trim: false }).scroll((self.scroll, 0)),
      chunks[2],
    );
  }
}

impl View for IssueDetailView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('j') | KeyCode::Down => self.scroll = self.scroll.saturating_add(1),
      KeyCode::Char('k') | KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
      KeyCode::PageDown => self.scroll = self.scroll.saturating_add(10),
      KeyCode::PageUp => self.scroll = self.scroll.saturating_sub(10),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    self.render_detail(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    format!("#{}", self.preview.id)
  }

  fn tick(&mut self) {
    self.query.poll();
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("j/k", "scroll").with_priority(10),
      Shortcut::new("r", "refresh").with_priority(20),
      Shortcut::new("q", "back").with_priority(30),
    ]
  }
}
