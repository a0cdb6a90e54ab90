//! Test and suite outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

/// Why a test or suite failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl TestError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Keep the machine-readable code and payload of a harness error
    pub fn from_harness(error: &HarnessError) -> Self {
        Self {
            message: error.to_string(),
            code: Some(error.code().to_string()),
            details: Some(error.details()),
        }
    }

    /// Use the first [`HarnessError`] in the chain when there is one
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        match error
            .chain()
            .find_map(|e| e.downcast_ref::<HarnessError>())
        {
            Some(harness) => Self::from_harness(harness),
            None => Self::message(format!("{:#}", error)),
        }
    }
}

/// Outcome of one test. Never modified after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    /// RFC 3339
    pub started_at: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// Per-suite test statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteMetrics {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub average_duration_ms: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
}

impl SuiteMetrics {
    pub fn from_tests(tests: &[TestResult]) -> Self {
        if tests.is_empty() {
            return Self::default();
        }

        let passed = tests.iter().filter(|t| t.passed()).count();
        let durations = tests.iter().map(|t| t.duration_ms);
        let total_ms: u64 = durations.clone().sum();

        Self {
            total: tests.len(),
            passed,
            failed: tests.len() - passed,
            average_duration_ms: total_ms as f64 / tests.len() as f64,
            min_duration_ms: durations.clone().min().unwrap_or(0),
            max_duration_ms: durations.max().unwrap_or(0),
        }
    }
}

/// Outcome of one suite against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
    pub name: String,
    /// Transport label, or `unknown` when detection failed
    pub transport: String,
    /// Redacted descriptor
    pub descriptor: Value,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    pub tests: Vec<TestResult>,
    pub metrics: SuiteMetrics,
    pub started_at: String,
    pub duration_ms: u64,
}

impl SuiteResult {
    /// Assemble a suite outcome. It passes only without a top-level error
    /// and with every test passing.
    pub fn new(
        name: impl Into<String>,
        transport: impl Into<String>,
        descriptor: Value,
        tests: Vec<TestResult>,
        error: Option<TestError>,
        started_at: String,
        duration_ms: u64,
    ) -> Self {
        let metrics = SuiteMetrics::from_tests(&tests);
        let status = if error.is_none() && metrics.failed == 0 {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        Self {
            name: name.into(),
            transport: transport.into(),
            descriptor,
            status,
            error,
            tests,
            metrics,
            started_at,
            duration_ms,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    /// Whether the suite never got a working connection
    pub fn is_connection_failure(&self) -> bool {
        self.error
            .as_ref()
            .and_then(|e| e.code.as_deref())
            .is_some_and(|code| code == "CONNECTION_ERROR")
    }

    pub fn test(&self, name: &str) -> Option<&TestResult> {
        self.tests.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(name: &str, status: TestStatus, duration_ms: u64) -> TestResult {
        TestResult {
            name: name.to_string(),
            started_at: "2024-01-01T00:00:00Z".to_string(),
            status,
            duration_ms,
            data: None,
            error: None,
        }
    }

    #[test]
    fn metrics_summarize_durations() {
        let metrics = SuiteMetrics::from_tests(&[
            result("a", TestStatus::Passed, 10),
            result("b", TestStatus::Failed, 30),
            result("c", TestStatus::Passed, 20),
        ]);
        assert_eq!(metrics.total, 3);
        assert_eq!(metrics.passed, 2);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.average_duration_ms, 20.0);
        assert_eq!(metrics.min_duration_ms, 10);
        assert_eq!(metrics.max_duration_ms, 30);
    }

    #[test]
    fn empty_metrics_are_zero() {
        assert_eq!(SuiteMetrics::from_tests(&[]), SuiteMetrics::default());
    }

    #[test]
    fn suite_fails_on_any_failed_test_or_error() {
        let passing = SuiteResult::new(
            "s",
            "stdio",
            json!({}),
            vec![result("a", TestStatus::Passed, 1)],
            None,
            String::new(),
            1,
        );
        assert!(passing.passed());

        let failing_test = SuiteResult::new(
            "s",
            "stdio",
            json!({}),
            vec![result("a", TestStatus::Failed, 1)],
            None,
            String::new(),
            1,
        );
        assert!(!failing_test.passed());

        let error = TestError::from_harness(&HarnessError::connection("stdio", 3, "refused"));
        let connection = SuiteResult::new("s", "stdio", json!({}), vec![], Some(error), String::new(), 1);
        assert!(!connection.passed());
        assert!(connection.is_connection_failure());
    }

    #[test]
    fn error_from_anyhow_keeps_harness_code() {
        let err: anyhow::Error = HarnessError::tool_not_found("ad", vec!["add".into()]).into();
        let err = err.context("tool test");
        let test_error = TestError::from_anyhow(&err);
        assert_eq!(test_error.code.as_deref(), Some("TOOL_NOT_FOUND"));
        assert_eq!(test_error.details.unwrap()["availableTools"][0], "add");

        let plain = TestError::from_anyhow(&anyhow::anyhow!("boom"));
        assert_eq!(plain.message, "boom");
        assert!(plain.code.is_none());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let json = serde_json::to_value(result("a", TestStatus::Passed, 5)).unwrap();
        assert_eq!(json["status"], "passed");
        assert_eq!(json["durationMs"], 5);
        assert!(json.get("startedAt").is_some());
        assert!(json.get("error").is_none());
    }
}
