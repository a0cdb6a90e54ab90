//! Error taxonomy for harness runs
//!
//! Every failure the harness can record is one of a closed set of kinds, each
//! with a fixed payload, a machine-readable [`HarnessError::code`] and a JSON
//! [`HarnessError::details`] rendering used by the report artifact.

pub mod suggestions;

use miette::Diagnostic;
use serde_json::{json, Value};
use thiserror::Error;

use crate::runner::schema::SchemaViolation;

/// Result alias for harness boundaries
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Main error type for harness runs with rich diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum HarnessError {
    /// Descriptor or configuration missing required fields
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(mcp_harness::config::invalid))]
    InvalidConfig { message: String },

    /// Transport tag is not one of the known kinds
    #[error("Invalid transport: '{transport}'")]
    #[diagnostic(code(mcp_harness::config::transport), help("{suggestion}"))]
    InvalidTransport {
        transport: String,
        suggestion: String,
    },

    /// Handshake or liveness check failed on every attempt
    #[error("Connection failed via {transport} after {attempts} attempt(s): {message}")]
    #[diagnostic(code(mcp_harness::connection), help("{suggestion}"))]
    Connection {
        transport: String,
        attempts: u32,
        message: String,
        suggestion: String,
    },

    /// A single test did not finish in time
    #[error("Test '{test}' timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(mcp_harness::timeout),
        help("Increase the test timeout with --timeout or check whether the server is stuck")
    )]
    Timeout { test: String, timeout_ms: u64 },

    /// Configured tool is not advertised by the server
    #[error("Tool '{tool}' not found. Available tools: {}", .available.join(", "))]
    #[diagnostic(code(mcp_harness::tool::not_found))]
    ToolNotFound {
        tool: String,
        available: Vec<String>,
        suggestion: Option<String>,
    },

    /// Arguments do not satisfy the tool's declared input schema
    #[error("Schema validation failed for tool '{tool}':\n{}", SchemaViolation::render_all(.violations))]
    #[diagnostic(code(mcp_harness::tool::schema))]
    SchemaValidation {
        tool: String,
        violations: Vec<SchemaViolation>,
    },

    /// The call itself was rejected or reported an error result
    #[error("Tool '{tool}' execution failed: {message}")]
    #[diagnostic(code(mcp_harness::tool::execution))]
    ToolExecution { tool: String, message: String },

    /// The call succeeded but the payload is not a well-formed tool result
    #[error("Invalid response from tool '{tool}': {message}")]
    #[diagnostic(code(mcp_harness::tool::response))]
    InvalidResponse {
        tool: String,
        message: String,
        response: Value,
    },

    /// A caller-supplied assertion rejected the result
    #[error("Assertion #{index} ({assertion}) failed for tool '{tool}': {message}")]
    #[diagnostic(code(mcp_harness::tool::assertion))]
    AssertionFailed {
        tool: String,
        index: usize,
        assertion: String,
        message: String,
    },
}

impl HarnessError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_transport(transport: impl Into<String>) -> Self {
        let transport = transport.into();
        let suggestion = suggestions::suggest_transport(&transport);
        Self::InvalidTransport {
            transport,
            suggestion,
        }
    }

    pub fn connection(transport: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        let suggestion = suggestions::suggest_connection_fix(&message);
        Self::Connection {
            transport: transport.into(),
            attempts,
            message,
            suggestion,
        }
    }

    pub fn tool_not_found(tool: impl Into<String>, available: Vec<String>) -> Self {
        let tool = tool.into();
        let suggestion = suggestions::suggest_tool(&tool, &available);
        Self::ToolNotFound {
            tool,
            available,
            suggestion,
        }
    }

    /// Machine-readable error code recorded on failed test results
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::InvalidTransport { .. } => "INVALID_TRANSPORT",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Timeout { .. } => "TEST_TIMEOUT",
            Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Self::SchemaValidation { .. } => "SCHEMA_VALIDATION_FAILED",
            Self::ToolExecution { .. } => "TOOL_EXECUTION_FAILED",
            Self::InvalidResponse { .. } => "INVALID_RESPONSE",
            Self::AssertionFailed { .. } => "ASSERTION_FAILED",
        }
    }

    /// Structured payload for the report artifact
    pub fn details(&self) -> Value {
        match self {
            Self::InvalidConfig { message } => json!({ "message": message }),
            Self::InvalidTransport { transport, .. } => json!({
                "transport": transport,
                "valid": ["stdio", "sse", "streamable_http"],
            }),
            Self::Connection {
                transport,
                attempts,
                message,
                ..
            } => json!({
                "transport": transport,
                "attempts": attempts,
                "lastError": message,
            }),
            Self::Timeout { test, timeout_ms } => json!({
                "test": test,
                "timeoutMs": timeout_ms,
            }),
            Self::ToolNotFound {
                tool,
                available,
                suggestion,
            } => json!({
                "tool": tool,
                "availableTools": available,
                "suggestion": suggestion,
            }),
            Self::SchemaValidation { tool, violations } => json!({
                "tool": tool,
                "errors": violations,
            }),
            Self::ToolExecution { tool, message } => json!({
                "tool": tool,
                "error": message,
            }),
            Self::InvalidResponse { tool, response, .. } => json!({
                "tool": tool,
                "response": response,
            }),
            Self::AssertionFailed {
                tool,
                index,
                assertion,
                message,
            } => json!({
                "tool": tool,
                "assertionIndex": index,
                "assertion": assertion,
                "error": message,
            }),
        }
    }

    /// Errors that retrying cannot fix
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::InvalidTransport { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::schema::ViolationKind;

    #[test]
    fn codes_are_stable() {
        assert_eq!(HarnessError::invalid_config("x").code(), "INVALID_CONFIG");
        assert_eq!(HarnessError::invalid_transport("ws").code(), "INVALID_TRANSPORT");
        assert_eq!(
            HarnessError::connection("stdio", 3, "boom").code(),
            "CONNECTION_ERROR"
        );
        assert_eq!(
            HarnessError::Timeout {
                test: "t".into(),
                timeout_ms: 10
            }
            .code(),
            "TEST_TIMEOUT"
        );
    }

    #[test]
    fn connection_details_carry_last_error() {
        let err = HarnessError::connection("sse", 2, "Connection refused");
        let details = err.details();
        assert_eq!(details["transport"], "sse");
        assert_eq!(details["attempts"], 2);
        assert_eq!(details["lastError"], "Connection refused");
        assert!(err.to_string().contains("after 2 attempt(s)"));
    }

    #[test]
    fn tool_not_found_lists_available_and_suggests() {
        let err = HarnessError::tool_not_found("ad", vec!["add".into(), "multiply".into()]);
        assert!(err.to_string().contains("add, multiply"));
        assert_eq!(err.details()["availableTools"][1], "multiply");
        assert_eq!(err.details()["suggestion"], "add");
    }

    #[test]
    fn schema_validation_message_includes_violations() {
        let err = HarnessError::SchemaValidation {
            tool: "export".into(),
            violations: vec![SchemaViolation {
                kind: ViolationKind::MissingRequired,
                field: "output".into(),
                message: "Missing required field 'output'".into(),
                suggestion: "\"output\": \"json\"".into(),
            }],
        };
        let text = err.to_string();
        assert!(text.contains("Missing required field 'output'"));
        assert_eq!(err.details()["errors"][0]["field"], "output");
        assert_eq!(err.details()["errors"][0]["kind"], "missing_required");
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        assert!(HarnessError::invalid_config("x").is_configuration_error());
        assert!(HarnessError::invalid_transport("x").is_configuration_error());
        assert!(!HarnessError::connection("stdio", 1, "x").is_configuration_error());
    }
}
