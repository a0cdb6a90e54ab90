//! Console output for harness runs
//!
//! Detects the output mode (interactive, CI, plain) once and renders phase
//! banners, test outcomes and summaries accordingly.

use std::io::{self, IsTerminal};

use colored::Colorize;

use crate::runner::results::{TestResult, TestStatus};

/// Output mode for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Interactive terminal with colors and unicode
    Interactive,
    /// CI environment - plain text, no colors
    CI,
    /// Piped output - plain text, no colors
    Plain,
}

impl OutputMode {
    /// Detect the appropriate output mode based on environment
    pub fn detect() -> Self {
        if is_ci::cached() {
            return OutputMode::CI;
        }
        if io::stdout().is_terminal() {
            OutputMode::Interactive
        } else {
            OutputMode::Plain
        }
    }

    pub fn colors_enabled(&self) -> bool {
        matches!(self, OutputMode::Interactive)
    }

    pub fn unicode_enabled(&self) -> bool {
        matches!(self, OutputMode::Interactive)
    }
}

impl Default for OutputMode {
    fn default() -> Self {
        Self::detect()
    }
}

/// Status markers, in unicode and ASCII form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Pass,
    Fail,
    Warn,
    Info,
}

impl Marker {
    fn render(self, mode: OutputMode) -> &'static str {
        match (self, mode.unicode_enabled()) {
            (Marker::Pass, true) => "✓",
            (Marker::Pass, false) => "[PASS]",
            (Marker::Fail, true) => "✗",
            (Marker::Fail, false) => "[FAIL]",
            (Marker::Warn, true) => "⚠",
            (Marker::Warn, false) => "[WARN]",
            (Marker::Info, true) => "ℹ",
            (Marker::Info, false) => "[INFO]",
        }
    }
}

/// One line describing a test outcome, without colors
pub fn format_test_line(result: &TestResult, mode: OutputMode) -> String {
    let marker = match result.status {
        TestStatus::Passed => Marker::Pass,
        TestStatus::Failed => Marker::Fail,
    };
    let mut line = format!(
        "{} {} ({}ms)",
        marker.render(mode),
        result.name,
        result.duration_ms
    );
    if let Some(error) = &result.error {
        line.push_str(": ");
        line.push_str(&error.message);
        if let Some(code) = &error.code {
            line.push_str(&format!(" [{}]", code));
        }
    }
    line
}

/// Centralized printer that respects output mode
#[derive(Debug, Clone)]
pub struct Printer {
    mode: OutputMode,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    /// Create a new printer with auto-detected mode
    pub fn new() -> Self {
        Self {
            mode: OutputMode::detect(),
        }
    }

    pub fn with_mode(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn println(&self, message: &str) {
        println!("{}", message);
    }

    pub fn newline(&self) {
        println!();
    }

    pub fn separator(&self) {
        let rule = if self.mode.unicode_enabled() { "━" } else { "-" };
        println!("{}", rule.repeat(60));
    }

    pub fn header(&self, text: &str) {
        if self.mode.colors_enabled() {
            println!("{}", text.cyan().bold());
        } else {
            println!("{}", text);
        }
    }

    /// Banner printed when a suite phase starts
    pub fn phase(&self, name: &str) {
        if self.mode.colors_enabled() {
            println!("\n{} {}", "▸".cyan(), name.bold());
        } else {
            println!("\n== {} ==", name);
        }
    }

    /// One test outcome, as soon as it is known
    pub fn test_result(&self, result: &TestResult) {
        let line = format!("  {}", format_test_line(result, self.mode));
        if !self.mode.colors_enabled() {
            println!("{}", line);
        } else if result.passed() {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }
    }

    pub fn success(&self, message: &str) {
        self.marked(Marker::Pass, message);
    }

    /// Print an error message to stderr
    pub fn error(&self, message: &str) {
        let symbol = Marker::Fail.render(self.mode);
        if self.mode.colors_enabled() {
            eprintln!("{} {}", symbol.red(), message.red());
        } else {
            eprintln!("{} {}", symbol, message);
        }
    }

    pub fn warning(&self, message: &str) {
        self.marked(Marker::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.marked(Marker::Info, message);
    }

    fn marked(&self, marker: Marker, message: &str) {
        let symbol = marker.render(self.mode);
        if !self.mode.colors_enabled() {
            println!("{} {}", symbol, message);
            return;
        }
        match marker {
            Marker::Pass => println!("{} {}", symbol.green(), message.green()),
            Marker::Fail => println!("{} {}", symbol.red(), message.red()),
            Marker::Warn => println!("{} {}", symbol.yellow(), message.yellow()),
            Marker::Info => println!("{} {}", symbol.cyan(), message),
        }
    }

    pub fn bullet(&self, message: &str) {
        let symbol = if self.mode.unicode_enabled() { "•" } else { "-" };
        println!("  {} {}", symbol, message);
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.mode.colors_enabled() {
            println!("  {}: {}", key.cyan(), value);
        } else {
            println!("  {}: {}", key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::results::TestError;

    fn result(status: TestStatus, error: Option<TestError>) -> TestResult {
        TestResult {
            name: "Discovery: list tools".into(),
            started_at: String::new(),
            status,
            duration_ms: 12,
            data: None,
            error,
        }
    }

    #[test]
    fn output_mode_flags() {
        assert!(OutputMode::Interactive.colors_enabled());
        assert!(!OutputMode::CI.colors_enabled());
        assert!(!OutputMode::Plain.unicode_enabled());
    }

    #[test]
    fn plain_test_line_uses_ascii_markers() {
        let line = format_test_line(&result(TestStatus::Passed, None), OutputMode::Plain);
        assert_eq!(line, "[PASS] Discovery: list tools (12ms)");
    }

    #[test]
    fn failed_test_line_includes_error_and_code() {
        let error = TestError {
            message: "Test 'x' timed out after 5ms".into(),
            code: Some("TEST_TIMEOUT".into()),
            details: None,
        };
        let line = format_test_line(&result(TestStatus::Failed, Some(error)), OutputMode::CI);
        assert!(line.starts_with("[FAIL]"));
        assert!(line.ends_with("[TEST_TIMEOUT]"));
    }

    #[test]
    fn interactive_test_line_uses_unicode() {
        let line = format_test_line(&result(TestStatus::Passed, None), OutputMode::Interactive);
        assert!(line.starts_with('✓'));
    }

    #[test]
    fn printer_with_mode() {
        let printer = Printer::with_mode(OutputMode::CI);
        assert_eq!(printer.mode(), OutputMode::CI);
        printer.phase("Discovery");
        printer.test_result(&result(TestStatus::Passed, None));
    }
}
