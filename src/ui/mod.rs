//! Console presentation
//!
//! Output adapts to the environment: colors and unicode markers on an
//! interactive terminal, plain ASCII in CI or when piped.

pub mod output;

pub use output::{format_test_line, OutputMode, Printer};
