//! Terminal styling: semantic colors, labeled output, and the replica table.

use std::sync::atomic::{AtomicBool, Ordering};

pub mod colors;
pub mod output;
pub mod table;

pub use output::*;
pub use table::*;

/// Global flag to track if colors are disabled.
static NO_COLOR: AtomicBool = AtomicBool::new(false);

/// Disables color when asked to, or when stdout is not a color terminal.
pub fn init(no_color_flag: bool) {
    set_no_color(no_color_flag || !console::colors_enabled());
}

/// Sets the global no-color flag.
pub fn set_no_color(value: bool) {
    NO_COLOR.store(value, Ordering::SeqCst);
}

/// Checks if colors are disabled.
pub fn no_color() -> bool {
    NO_COLOR.load(Ordering::SeqCst)
}
