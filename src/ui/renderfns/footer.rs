use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// A transient message shown at the right of the footer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
  pub text: String,
  pub is_error: bool,
}

/// Draw the footer bar with view breadcrumb and the latest status message
pub fn draw_footer(frame: &mut Frame, area: Rect, breadcrumb: &[String], status: Option<&StatusLine>) {
  let mut spans = vec![Span::raw(" ")];

  for (i, part) in breadcrumb.iter().enumerate() {
    if i > 0 {
      spans.push(Span::styled(" > ", Style::default().fg(Color::DarkGray)));
    }
    let style = if i == breadcrumb.len() - 1 {
      Style::default().fg(Color::Cyan).bold()
    } else {
      Style::default().fg(Color::White)
    };
    spans.push(Span::styled(part.clone(), style));
  }

  let left = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(left, area);

  if let Some(status) = status {
    let color = if status.is_error { Color::Red } else { Color::Green };
    let right = Paragraph::new(format!("{} ", status.text))
      .style(Style::default().fg(color).bg(Color::Black))
      .alignment(Alignment::Right);
    frame.render_widget(right, area);
  }
}
