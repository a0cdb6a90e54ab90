//! End-to-end tests over the stdio transport
//!
//! Every test drives the `stdio_test_server` binary built alongside the
//! harness, so no external MCP server is needed.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;

use mcp_harness::client::{McpClient, ProtocolClient};
use mcp_harness::config::{HarnessConfig, ToolTestConfig};
use mcp_harness::protocol::mcp::CallToolResult;
use mcp_harness::reporter::{Report, ReportGenerator};
use mcp_harness::runner::phases::{DISCOVERY_PROMPTS, DISCOVERY_RESOURCES, DISCOVERY_TOOLS};
use mcp_harness::runner::{ConnectionManager, RetryPolicy, RunContext, SuiteRunner, ToolTest};
use mcp_harness::transport::{build_transport, TransportConfig, TransportDescriptor};

const SERVER: &str = env!("CARGO_BIN_EXE_stdio_test_server");

fn server_descriptor() -> TransportDescriptor {
    TransportDescriptor::stdio(SERVER, vec![], BTreeMap::new()).unwrap()
}

fn quick_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.harness.timeout_ms = 10_000;
    config.retry.attempts = 2;
    config.retry.delay_ms = 10;
    config.stability.sequential_calls = 5;
    config.stability.concurrent_calls = 5;
    config.performance.iterations = 3;
    config.performance.concurrent = 3;
    config
}

fn tool_config(tool: &str, arguments: serde_json::Value, expect_text: &str) -> ToolTestConfig {
    ToolTestConfig {
        tool: tool.to_string(),
        arguments,
        expect_text: Some(expect_text.to_string()),
        expect_success: true,
        min_content_items: Some(1),
        max_duration_ms: None,
    }
}

// =============================================================================
// Client over a real process
// =============================================================================

mod client_tests {
    use super::*;

    #[tokio::test]
    async fn lists_and_calls_arithmetic_tools() {
        let transport = build_transport(&server_descriptor(), &TransportConfig::default()).unwrap();
        let client = McpClient::for_harness(transport);

        let init = client.connect().await.unwrap();
        assert_eq!(init.server_info.name, "stdio-test-server");

        let tools = client.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["add", "multiply"]);

        let sum: CallToolResult =
            serde_json::from_value(client.call_tool("add", json!({"a": 2, "b": 3})).await.unwrap())
                .unwrap();
        assert_eq!(sum.joined_text(), "5");

        let product: CallToolResult = serde_json::from_value(
            client
                .call_tool("multiply", json!({"a": 4, "b": 2.5}))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(product.joined_text(), "10");

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_tool_is_a_protocol_error() {
        let transport = build_transport(&server_descriptor(), &TransportConfig::default()).unwrap();
        let client = McpClient::for_harness(transport);
        client.connect().await.unwrap();

        let err = client.call_tool("divide", json!({})).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown tool"));

        client.close().await.unwrap();
    }
}

// =============================================================================
// Full suites
// =============================================================================

mod suite_tests {
    use super::*;

    #[tokio::test]
    async fn arithmetic_server_passes_full_suite() {
        let mut config = quick_config();
        config.tools = vec![
            tool_config("add", json!({"a": 5, "b": 3}), "8"),
            tool_config("multiply", json!({"a": 3, "b": 4}), "12"),
        ];
        let runner = SuiteRunner::new(config);

        let result = runner.run("arithmetic", &server_descriptor()).await;

        assert!(result.passed(), "{:#?}", result);
        assert_eq!(result.transport, "stdio");
        assert_eq!(result.test(DISCOVERY_TOOLS).unwrap().data.as_ref().unwrap()["count"], 2);
        for name in [DISCOVERY_RESOURCES, DISCOVERY_PROMPTS] {
            let data = result.test(name).unwrap().data.clone().unwrap();
            assert_eq!(data["supported"], false);
        }
        assert!(result.test("Tool: add").unwrap().passed());
        assert!(result.test("Tool: multiply").unwrap().passed());
        assert_eq!(runner.context().connection_attempts(), 1);
        assert!(runner.context().assertions_run() >= 6);
    }

    #[tokio::test]
    async fn missing_required_argument_fails_schema_validation() {
        let mut config = quick_config();
        config.phases.stability = false;
        config.phases.performance = false;
        let runner = SuiteRunner::new(config).with_tool_test(ToolTest::new("add", json!({"a": 5})));

        let result = runner.run("schema", &server_descriptor()).await;

        assert!(!result.passed());
        let error = result.test("Tool: add").unwrap().error.clone().unwrap();
        assert_eq!(error.code.as_deref(), Some("SCHEMA_VALIDATION_FAILED"));
        let details = error.details.unwrap();
        assert_eq!(details["errors"][0]["field"], "b");
        assert_eq!(details["errors"][0]["kind"], "missing_required");
    }

    #[tokio::test]
    async fn report_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = quick_config();
        config.harness.output_dir = dir.path().to_path_buf();
        config.tools = vec![tool_config("add", json!({"a": 1, "b": 1}), "2")];
        let runner = SuiteRunner::new(config.clone());

        let results = vec![runner.run("report", &server_descriptor()).await];
        let generator = ReportGenerator::from_config(&config);
        let report = generator.generate(results, runner.context(), Duration::from_millis(10));
        let path = generator.write(&report).unwrap();

        let parsed: Report = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.summary, report.summary);
        assert_eq!(parsed.summary.total, 1);
        assert_eq!(parsed.metrics.connection_attempts, 1);
        assert_eq!(parsed.metrics.total_tests_run as usize, parsed.summary.total_tests);
    }
}

// =============================================================================
// Connection failures
// =============================================================================

mod connection_tests {
    use super::*;

    #[tokio::test]
    async fn missing_command_exhausts_every_attempt() {
        let context = RunContext::new();
        let manager = ConnectionManager::new(
            RetryPolicy::new(3, Duration::from_millis(5)),
            context.clone(),
        );
        let descriptor = TransportDescriptor::stdio(
            "/nonexistent/mcp-harness-test-server",
            vec![],
            BTreeMap::new(),
        )
        .unwrap();

        let err = manager.connect(&descriptor).await.unwrap_err();

        assert_eq!(err.code(), "CONNECTION_ERROR");
        assert_eq!(err.details()["attempts"], 3);
        assert_eq!(context.connection_attempts(), 3);
    }

    #[tokio::test]
    async fn failing_liveness_check_fails_connection() {
        let mut env = BTreeMap::new();
        env.insert("MCP_HARNESS_TEST_FAIL_LIST_TOOLS".to_string(), "1".to_string());
        let descriptor = TransportDescriptor::stdio(SERVER, vec![], env).unwrap();
        let runner = SuiteRunner::new(quick_config());

        let result = runner.run("no liveness", &descriptor).await;

        assert!(!result.passed());
        assert!(result.is_connection_failure());
        assert!(result.tests.is_empty());
        let error = result.error.unwrap();
        assert!(error.message.contains("liveness check"), "{}", error.message);
        assert_eq!(runner.context().connection_attempts(), 2);
    }
}
