pub mod components;
pub mod renderfns;
pub mod view;
pub mod views;

use crate::app::App;
use ratatui::prelude::*;
use renderfns::{draw_footer, draw_header};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &mut App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Current view
      Constraint::Length(1), // Breadcrumb and status
    ])
    .split(frame.area());

  let breadcrumb = app.breadcrumb();
  let context = breadcrumb.last().cloned().unwrap_or_default();
  draw_header(frame, chunks[0], app.api_url(), &context, &app.shortcuts());
  draw_footer(frame, chunks[2], &breadcrumb, app.status());

  if let Some(view) = app.current_view_mut() {
    view.render(frame, chunks[1]);
  }
}
