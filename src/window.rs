//! List windowing.
//!
//! Long lists only materialize the rows around the viewport. Every item has
//! the same height, so the window is a pure function of the item count and
//! the scroll position.

use std::ops::Range;

/// Lists shorter than this are rendered in full.
pub const DEFAULT_THRESHOLD: usize = 50;

/// Extra items kept on each side of the viewport.
pub const DEFAULT_OVERSCAN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowOptions {
  pub item_height: f64,
  pub viewport_height: f64,
  pub overscan: usize,
  pub threshold: usize,
}

impl WindowOptions {
  pub fn new(item_height: f64, viewport_height: f64) -> Self {
    Self {
      item_height,
      viewport_height,
      overscan: DEFAULT_OVERSCAN,
      threshold: DEFAULT_THRESHOLD,
    }
  }

  pub fn with_overscan(mut self, overscan: usize) -> Self {
    self.overscan = overscan;
    self
  }

  pub fn with_threshold(mut self, threshold: usize) -> Self {
    self.threshold = threshold;
    self
  }

  /// Whether the geometry allows windowing at all.
  fn is_measurable(&self) -> bool {
    self.item_height > 0.0 && self.viewport_height > 0.0
  }

  fn total_height(&self, item_count: usize) -> f64 {
    if self.item_height > 0.0 {
      item_count as f64 * self.item_height
    } else {
      0.0
    }
  }
}

/// A materialized item and its absolute top offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualItem {
  pub index: usize,
  pub offset: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualWindow {
  /// Materialized indices, end exclusive
  pub range: Range<usize>,
  pub items: Vec<VirtualItem>,
  /// Height of the whole list, so the container can reserve space
  pub total_height: f64,
  /// `false` when every item is materialized
  pub virtualized: bool,
}

impl VirtualWindow {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Last materialized index.
  pub fn end_index(&self) -> Option<usize> {
    self.range.end.checked_sub(1).filter(|_| !self.range.is_empty())
  }
}

/// Compute which items to materialize for the given scroll position.
///
/// Below the threshold, or when either height is not positive, every item is
/// returned. Otherwise the range is
/// `floor(top / h) - overscan ..= ceil((top + viewport) / h) + overscan`,
/// clamped to the list.
pub fn compute_window(item_count: usize, scroll_top: f64, options: &WindowOptions) -> VirtualWindow {
  let total_height = options.total_height(item_count);
  let row_height = options.item_height.max(0.0);

  if item_count == 0 || item_count < options.threshold || !options.is_measurable() {
    return VirtualWindow {
      range: 0..item_count,
      items: items_in(0..item_count, row_height),
      total_height,
      virtualized: false,
    };
  }

  let h = options.item_height;
  // NaN and negative positions scroll to the top
  let top = scroll_top.max(0.0);
  let last = item_count - 1;

  let first_visible = (top / h).floor() as usize;
  let last_visible = ((top + options.viewport_height) / h).ceil() as usize;
  let start = first_visible.saturating_sub(options.overscan).min(last);
  let end = last_visible.saturating_add(options.overscan).min(last);
  let range = start..end + 1;

  VirtualWindow {
    items: items_in(range.clone(), h),
    range,
    total_height,
    virtualized: true,
  }
}

fn items_in(range: Range<usize>, item_height: f64) -> Vec<VirtualItem> {
  range
    .map(|index| VirtualItem {
      index,
      offset: index as f64 * item_height,
    })
    .collect()
}

/// Scroll state for one windowed list.
#[derive(Debug, Clone)]
pub struct VirtualList {
  options: WindowOptions,
  item_count: usize,
  scroll_top: f64,
}

impl VirtualList {
  pub fn new(options: WindowOptions) -> Self {
    Self {
      options,
      item_count: 0,
      scroll_top: 0.0,
    }
  }

  pub fn options(&self) -> &WindowOptions {
    &self.options
  }

  pub fn item_count(&self) -> usize {
    self.item_count
  }

  pub fn scroll_top(&self) -> f64 {
    self.scroll_top
  }

  pub fn total_height(&self) -> f64 {
    self.options.total_height(self.item_count)
  }

  pub fn set_item_count(&mut self, item_count: usize) {
    self.item_count = item_count;
    self.on_scroll(self.scroll_top);
  }

  pub fn set_viewport_height(&mut self, viewport_height: f64) {
    self.options.viewport_height = viewport_height;
    self.on_scroll(self.scroll_top);
  }

  fn max_scroll(&self) -> f64 {
    (self.total_height() - self.options.viewport_height.max(0.0)).max(0.0)
  }

  /// Record a new scroll position, clamped to the scrollable range.
  pub fn on_scroll(&mut self, scroll_top: f64) {
    self.scroll_top = scroll_top.max(0.0).min(self.max_scroll());
  }

  /// Put item `index` at the top of the viewport, or as close as the list
  /// allows.
  pub fn scroll_to_index(&mut self, index: usize) {
    let index = index.min(self.item_count.saturating_sub(1));
    self.on_scroll(index as f64 * self.options.item_height.max(0.0));
  }

  pub fn scroll_to_top(&mut self) {
    self.scroll_top = 0.0;
  }

  /// Scroll the minimum distance needed to show item `index` in full.
  pub fn scroll_into_view(&mut self, index: usize) {
    let h = self.options.item_height;
    if h <= 0.0 || index >= self.item_count {
      return;
    }
    let top = index as f64 * h;
    let bottom = top + h;
    let viewport = self.options.viewport_height.max(0.0);

    if top < self.scroll_top {
      self.on_scroll(top);
    } else if bottom > self.scroll_top + viewport {
      self.on_scroll(bottom - viewport);
    }
  }

  pub fn window(&self) -> VirtualWindow {
    compute_window(self.item_count, self.scroll_top, &self.options)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_small_list_renders_everything() {
    let options = WindowOptions::new(100.0, 500.0);
    let window = compute_window(10, 0.0, &options);

    assert_eq!(window.total_height, 1000.0);
    assert!(!window.virtualized);
    assert_eq!(window.len(), 10);
    assert_eq!(window.items[9], VirtualItem { index: 9, offset: 900.0 });
  }

  #[test]
  fn test_large_list_is_windowed() {
    let options = WindowOptions::new(100.0, 500.0).with_overscan(5);
    let window = compute_window(100, 0.0, &options);

    assert!(window.virtualized);
    assert_eq!(window.range, 0..11);
    assert!(window.items.iter().any(|item| item.index == 0));
    assert!(window.len() < 100);
    assert_eq!(window.total_height, 10_000.0);
  }

  #[test]
  fn test_empty_list_with_zero_threshold() {
    let options = WindowOptions::new(1.0, 10.0).with_threshold(0);
    let window = compute_window(0, 0.0, &options);

    assert!(!window.virtualized);
    assert!(window.is_empty());
    assert_eq!(window.range, 0..0);
    assert_eq!(window.total_height, 0.0);
  }

  #[test]
  fn test_scrolled_window() {
    let options = WindowOptions::new(100.0, 500.0).with_overscan(2);
    let window = compute_window(100, 1050.0, &options);

    // floor(10.5) - 2 ..= ceil(15.5) + 2
    assert_eq!(window.range, 8..19);
    assert_eq!(window.items[0], VirtualItem { index: 8, offset: 800.0 });
    assert_eq!(window.end_index(), Some(18));
  }

  #[test]
  fn test_window_clamps_at_the_end() {
    let options = WindowOptions::new(10.0, 100.0);
    let window = compute_window(60, 550.0, &options);
    assert_eq!(window.end_index(), Some(59));

    // Scrolled far past the end still yields a valid range
    let window = compute_window(60, 1e9, &options);
    assert_eq!(window.range, 59..60);
  }

  #[test]
  fn test_degenerate_geometry_renders_everything() {
    for options in [
      WindowOptions::new(0.0, 500.0),
      WindowOptions::new(-5.0, 500.0),
      WindowOptions::new(20.0, 0.0),
      WindowOptions::new(f64::NAN, 500.0),
    ] {
      let window = compute_window(200, 300.0, &options);
      assert!(!window.virtualized);
      assert_eq!(window.len(), 200);
      assert!(window.total_height.is_finite());
    }
  }

  #[test]
  fn test_empty_list() {
    let window = compute_window(0, 0.0, &WindowOptions::new(1.0, 10.0));
    assert!(window.is_empty());
    assert_eq!(window.end_index(), None);
    assert_eq!(window.total_height, 0.0);
  }

  #[test]
  fn test_threshold_is_configurable() {
    let options = WindowOptions::new(1.0, 5.0).with_threshold(10).with_overscan(0);
    let window = compute_window(20, 0.0, &options);
    assert!(window.virtualized);
    assert_eq!(window.range, 0..6);
  }

  #[test]
  fn test_virtual_list_scrolling() {
    let mut list = VirtualList::new(WindowOptions::new(1.0, 10.0).with_overscan(0));
    list.set_item_count(100);

    list.on_scroll(-3.0);
    assert_eq!(list.scroll_top(), 0.0);
    list.on_scroll(500.0);
    assert_eq!(list.scroll_top(), 90.0);

    list.scroll_to_index(40);
    assert_eq!(list.scroll_top(), 40.0);
    assert_eq!(list.window().range.start, 40);

    list.scroll_to_top();
    assert_eq!(list.scroll_top(), 0.0);
  }

  #[test]
  fn test_scroll_into_view() {
    let mut list = VirtualList::new(WindowOptions::new(1.0, 10.0));
    list.set_item_count(100);

    // Already visible: no movement
    list.scroll_into_view(5);
    assert_eq!(list.scroll_top(), 0.0);

    list.scroll_into_view(10);
    assert_eq!(list.scroll_top(), 1.0);

    list.scroll_into_view(0);
    assert_eq!(list.scroll_top(), 0.0);
  }

  #[test]
  fn test_shrinking_list_reclamps_scroll() {
    let mut list = VirtualList::new(WindowOptions::new(1.0, 10.0));
    list.set_item_count(100);
    list.on_scroll(80.0);

    list.set_item_count(20);
    assert_eq!(list.scroll_top(), 10.0);
    list.set_viewport_height(30.0);
    assert_eq!(list.scroll_top(), 0.0);
  }
}
