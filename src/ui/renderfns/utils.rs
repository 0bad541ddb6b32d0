use ratatui::prelude::Color;

/// Truncate a string to at most `max_len` characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Get the display color for an issue's difficulty
pub fn difficulty_color(difficulty: Option<&str>) -> Color {
  match difficulty.map(str::to_lowercase).as_deref() {
    Some("beginner" | "easy" | "good-first-issue") => Color::Green,
    Some("intermediate" | "medium") => Color::Yellow,
    Some("advanced" | "hard" | "expert") => Color::Red,
    _ => Color::Gray,
  }
}
