//! Small text helpers shared by the registry and the CLI output.

mod text;

pub use text::{strip_control_chars, truncate_to_width};
