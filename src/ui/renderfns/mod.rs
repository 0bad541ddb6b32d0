pub mod footer;
pub mod header;
pub mod utils;

pub use footer::{draw_footer, StatusLine};
pub use header::draw_header;
pub use utils::{difficulty_color, truncate};
