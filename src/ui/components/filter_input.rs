use super::input::{InputResult, TextInput};
use super::KeyResult;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

/// Events emitted by the filter input that the parent needs to handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterEvent {
  /// Text changed; emitted on each keystroke, so callers debounce it
  Changed(String),
  /// Enter pressed; apply immediately
  Submitted(String),
  /// Escape pressed; the text was restored to what it was before editing
  Cancelled(String),
}

/// Filter box opened with `/`. Unlike a one-shot search, the text survives
/// between edits so the active filter can be refined.
#[derive(Debug, Clone, Default)]
pub struct FilterInput {
  input: TextInput,
  active: bool,
  before_edit: String,
}

impl FilterInput {
  pub fn with_value(value: impl Into<String>) -> Self {
    Self {
      input: TextInput::with_value(value),
      ..Self::default()
    }
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn value(&self) -> &str {
    self.input.value()
  }

  pub fn activate(&mut self) {
    self.active = true;
    self.before_edit = self.input.value().to_string();
  }

  /// Call this regardless of active state; it handles activation too
  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<FilterEvent> {
    if !self.active {
      if key.code == KeyCode::Char('/') {
        self.activate();
        return KeyResult::Handled;
      }
      return KeyResult::NotHandled;
    }

    match self.input.handle_key(key) {
      InputResult::Submitted(text) => {
        self.active = false;
        KeyResult::Event(FilterEvent::Submitted(text))
      }
      InputResult::Cancelled => {
        self.active = false;
        let previous = std::mem::take(&mut self.before_edit);
        self.input.set_value(previous.clone());
        KeyResult::Event(FilterEvent::Cancelled(previous))
      }
      InputResult::Consumed => {
        KeyResult::Event(FilterEvent::Changed(self.input.value().to_string()))
      }
      // Swallow everything else so list keys don't fire while typing
      InputResult::NotHandled => KeyResult::Handled,
    }
  }

  /// Render the filter overlay if active
  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    if !self.active {
      return;
    }

    let width = (area.width * 60 / 100).clamp(30, 70).min(area.width);
    let overlay_area = Rect::new(area.x + 1, area.y + 1, width, 3u16.min(area.height));
    frame.render_widget(Clear, overlay_area);

    let block = Block::default()
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Yellow))
      .title(" Filter (diff:<level> lang:<name> words) ");
    let inner = block.inner(overlay_area);
    frame.render_widget(block, overlay_area);
    if inner.height == 0 {
      return;
    }

    let value = self.input.value();
    let split = value
      .char_indices()
      .nth(self.input.cursor_position())
      .map(|(i, _)| i)
      .unwrap_or(value.len());
    let line = Line::from(vec![
      Span::styled("/", Style::default().fg(Color::Yellow)),
      Span::raw(&value[..split]),
      Span::styled("_", Style::default().fg(Color::Yellow)),
      Span::raw(&value[split..]),
    ]);
    frame.render_widget(Paragraph::new(line), inner);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  #[test]
  fn test_inactive_ignores_keys() {
    let mut filter = FilterInput::default();
    assert_eq!(filter.handle_key(key(KeyCode::Char('j'))), KeyResult::NotHandled);
    assert_eq!(filter.handle_key(key(KeyCode::Char('/'))), KeyResult::Handled);
    assert!(filter.is_active());
  }

  #[test]
  fn test_changes_then_submit() {
    let mut filter = FilterInput::default();
    filter.handle_key(key(KeyCode::Char('/')));
    assert_eq!(
      filter.handle_key(key(KeyCode::Char('g'))),
      KeyResult::Event(FilterEvent::Changed("g".into()))
    );
    assert_eq!(
      filter.handle_key(key(KeyCode::Char('o'))),
      KeyResult::Event(FilterEvent::Changed("go".into()))
    );
    assert_eq!(
      filter.handle_key(key(KeyCode::Enter)),
      KeyResult::Event(FilterEvent::Submitted("go".into()))
    );
    assert!(!filter.is_active());
    assert_eq!(filter.value(), "go");
  }

  #[test]
  fn test_cancel_restores_previous_text() {
    let mut filter = FilterInput::with_value("lang:rust");
    filter.handle_key(key(KeyCode::Char('/')));
    filter.handle_key(key(KeyCode::Backspace));
    filter.handle_key(key(KeyCode::Backspace));
    assert_eq!(filter.value(), "lang:ru");
    assert_eq!(
      filter.handle_key(key(KeyCode::Esc)),
      KeyResult::Event(FilterEvent::Cancelled("lang:rust".into()))
    );
    assert_eq!(filter.value(), "lang:rust");
  }

  #[test]
  fn test_active_swallows_unbound_keys() {
    let mut filter = FilterInput::default();
    filter.activate();
    assert_eq!(filter.handle_key(key(KeyCode::Tab)), KeyResult::Handled);
  }
}
