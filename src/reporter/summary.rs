//! Console summary of a report

use crate::ui::{format_test_line, Printer};

use super::Report;

/// Print per-suite results, totals and recommendations
pub fn print_summary(printer: &Printer, report: &Report) {
    printer.newline();
    printer.separator();
    printer.header("MCP harness results");
    printer.separator();

    for suite in &report.results {
        let line = format!(
            "{} [{}] {}/{} tests passed ({}ms)",
            suite.name, suite.transport, suite.metrics.passed, suite.metrics.total, suite.duration_ms
        );
        if suite.passed() {
            printer.success(&line);
        } else {
            printer.error(&line);
        }
        if let Some(error) = &suite.error {
            printer.bullet(&error.message);
        }
        for test in suite.tests.iter().filter(|t| !t.passed()) {
            printer.bullet(&format_test_line(test, printer.mode()));
        }
    }

    printer.newline();
    let summary = &report.summary;
    printer.kv(
        "Suites",
        &format!("{} total, {} passed, {} failed", summary.total, summary.passed, summary.failed),
    );
    printer.kv(
        "Tests",
        &format!(
            "{} total, {} passed, {} failed",
            summary.total_tests, summary.passed_tests, summary.failed_tests
        ),
    );
    for (transport, counts) in &summary.by_transport {
        printer.kv(
            transport,
            &format!("{}/{} suites passed", counts.passed, counts.total),
        );
    }
    printer.kv("Connection attempts", &report.metrics.connection_attempts.to_string());
    printer.kv("Duration", &format!("{}ms", report.duration));

    if !report.recommendations.is_empty() {
        printer.newline();
        printer.header("Recommendations");
        for rec in &report.recommendations {
            printer.warning(&format!("[{}] {}", rec.category, rec.message));
        }
    }
}
