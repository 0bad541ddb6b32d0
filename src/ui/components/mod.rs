mod filter_input;
mod input;

pub use filter_input::{FilterEvent, FilterInput};
pub use input::{InputResult, TextInput};

/// Outcome of offering a key to a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResult<T> {
  /// Consumed with nothing for the parent to do
  Handled,
  /// Consumed, and the parent should act on `T`
  Event(T),
  /// Not for this component
  NotHandled,
}
