//! Ratatui row browser used by the standalone binary's `--browse` flag. It
//! shows the built rows unchanged (no searching or ranking) and lets the user
//! pick one or open its attachment.

mod app;
mod terminal;

pub use app::{Browser, PickerEntry};
pub use terminal::run_browser;
