//! Declarative tool tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::{json, Value};

use crate::config::ToolTestConfig;
use crate::errors::HarnessError;
use crate::protocol::mcp::CallToolResult;

use super::connection::Session;
use super::context::RunContext;
use super::schema::validate_arguments;

/// Check run against a tool result
pub type AssertionFn = Arc<dyn Fn(&CallToolResult) -> Result<()> + Send + Sync>;

/// Named check over a tool result
#[derive(Clone)]
pub struct Assertion {
    name: String,
    check: AssertionFn,
}

impl Assertion {
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&CallToolResult) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Text content contains `needle`
    pub fn contains_text(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::new(format!("contains_text({:?})", needle), move |result| {
            let text = result.joined_text();
            if text.contains(&needle) {
                Ok(())
            } else {
                anyhow::bail!("expected text containing {:?}, got {:?}", needle, text)
            }
        })
    }

    /// Result is not flagged `isError`
    pub fn not_error() -> Self {
        Self::new("not_error", |result| {
            if result.is_error() {
                anyhow::bail!("tool reported an error: {}", result.joined_text())
            }
            Ok(())
        })
    }

    /// Result is flagged `isError`
    pub fn is_error() -> Self {
        Self::new("is_error", |result| {
            if result.is_error() {
                Ok(())
            } else {
                anyhow::bail!("expected an error result, got success")
            }
        })
    }

    pub fn min_content_items(min: usize) -> Self {
        Self::new(format!("min_content_items({})", min), move |result| {
            if result.content.len() >= min {
                Ok(())
            } else {
                anyhow::bail!(
                    "expected at least {} content item(s), got {}",
                    min,
                    result.content.len()
                )
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, result: &CallToolResult) -> Result<()> {
        (self.check)(result)
    }
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Assertion").field(&self.name).finish()
    }
}

/// Invoke one tool with fixed arguments and check the result
#[derive(Debug, Clone)]
pub struct ToolTest {
    pub tool: String,
    pub arguments: Value,
    pub assertions: Vec<Assertion>,
    /// Overrides the suite-wide tool call threshold
    pub max_duration: Option<Duration>,
    /// An `isError: true` result is checked by assertions instead of failing
    pub expect_error: bool,
}

impl ToolTest {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            assertions: Vec::new(),
            max_duration: None,
            expect_error: false,
        }
    }

    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    pub fn name(&self) -> String {
        format!("Tool: {}", self.tool)
    }
}

impl From<&ToolTestConfig> for ToolTest {
    fn from(config: &ToolTestConfig) -> Self {
        let mut test = ToolTest::new(config.tool.clone(), config.arguments.clone());
        if config.expect_success {
            test = test.with_assertion(Assertion::not_error());
        } else {
            test.expect_error = true;
            test = test.with_assertion(Assertion::is_error());
        }
        if let Some(text) = &config.expect_text {
            test = test.with_assertion(Assertion::contains_text(text.clone()));
        }
        if let Some(min) = config.min_content_items {
            test = test.with_assertion(Assertion::min_content_items(min));
        }
        if let Some(ms) = config.max_duration_ms {
            test = test.with_max_duration(Duration::from_millis(ms));
        }
        test
    }
}

/// Suite-wide settings applied to every tool test
#[derive(Debug, Clone, Copy)]
pub struct ToolTestSettings {
    pub validate_schemas: bool,
    pub call_threshold: Duration,
}

impl Default for ToolTestSettings {
    fn default() -> Self {
        Self {
            validate_schemas: true,
            call_threshold: Duration::from_millis(5000),
        }
    }
}

/// Run a tool test. Every failure is a [`HarnessError`] scoped to the tool.
pub(crate) async fn run_tool_test(
    test: ToolTest,
    session: Arc<Session>,
    settings: ToolTestSettings,
    context: Arc<RunContext>,
) -> Result<Value> {
    let client = session.client();
    let tool_name = test.tool.as_str();

    let tools = client.list_tools().await?;
    let Some(tool) = tools.iter().find(|t| t.name == tool_name) else {
        let available = tools.iter().map(|t| t.name.clone()).collect();
        return Err(HarnessError::tool_not_found(tool_name, available).into());
    };

    if settings.validate_schemas {
        let violations = validate_arguments(&tool.input_schema, &test.arguments);
        if !violations.is_empty() {
            return Err(HarnessError::SchemaValidation {
                tool: tool_name.to_string(),
                violations,
            }
            .into());
        }
    }

    let start = Instant::now();
    let raw = client
        .call_tool(tool_name, test.arguments.clone())
        .await
        .map_err(|e| HarnessError::ToolExecution {
            tool: tool_name.to_string(),
            message: format!("{:#}", e),
        })?;
    let elapsed = start.elapsed();

    if !raw.get("content").is_some_and(Value::is_array) {
        return Err(HarnessError::InvalidResponse {
            tool: tool_name.to_string(),
            message: "result.content is not an array".to_string(),
            response: raw,
        }
        .into());
    }
    let result: CallToolResult = match serde_json::from_value(raw.clone()) {
        Ok(result) => result,
        Err(e) => {
            return Err(HarnessError::InvalidResponse {
                tool: tool_name.to_string(),
                message: e.to_string(),
                response: raw,
            }
            .into())
        }
    };

    if result.is_error() && !test.expect_error {
        let text = result.joined_text();
        return Err(HarnessError::ToolExecution {
            tool: tool_name.to_string(),
            message: if text.is_empty() {
                "tool returned isError: true".to_string()
            } else {
                text
            },
        }
        .into());
    }

    let limit = test.max_duration.unwrap_or(settings.call_threshold);
    let slow = elapsed > limit;
    if slow {
        tracing::warn!(
            "Tool '{}' took {}ms (threshold {}ms)",
            tool_name,
            elapsed.as_millis(),
            limit.as_millis()
        );
    }

    for (index, assertion) in test.assertions.iter().enumerate() {
        context.record_assertion();
        if let Err(e) = assertion.check(&result) {
            return Err(HarnessError::AssertionFailed {
                tool: tool_name.to_string(),
                index,
                assertion: assertion.name().to_string(),
                message: format!("{:#}", e),
            }
            .into());
        }
    }

    Ok(json!({
        "tool": tool_name,
        "callDurationMs": elapsed.as_millis() as u64,
        "thresholdMs": limit.as_millis() as u64,
        "thresholdExceeded": slow,
        "contentItems": result.content.len(),
        "assertions": test.assertions.len(),
        "text": result.joined_text(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::transport::TransportDescriptor;
    use std::collections::BTreeMap;

    fn session(client: MockClient) -> Arc<Session> {
        let descriptor = TransportDescriptor::stdio("mock", vec![], BTreeMap::new()).unwrap();
        Arc::new(Session::new(descriptor, Arc::new(client)))
    }

    fn calculator() -> MockClient {
        MockClient::new().with_tool(
            "add",
            json!({
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            }),
            |args| {
                let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
                Ok(json!({"content": [{"type": "text", "text": sum.to_string()}]}))
            },
        )
    }

    async fn run(test: ToolTest, client: MockClient) -> (Result<Value>, Arc<RunContext>) {
        let context = RunContext::new();
        let result = run_tool_test(
            test,
            session(client),
            ToolTestSettings::default(),
            context.clone(),
        )
        .await;
        (result, context)
    }

    fn harness_code(err: &anyhow::Error) -> &'static str {
        err.downcast_ref::<HarnessError>().unwrap().code()
    }

    #[tokio::test]
    async fn passing_tool_test_reports_data() {
        let test = ToolTest::new("add", json!({"a": 2, "b": 3}))
            .with_assertion(Assertion::not_error())
            .with_assertion(Assertion::contains_text("5"));
        let (result, context) = run(test, calculator()).await;
        let data = result.unwrap();
        assert_eq!(data["text"], "5");
        assert_eq!(context.assertions_run(), 2);
    }

    #[tokio::test]
    async fn missing_tool_suggests_closest_name() {
        let (result, _) = run(ToolTest::new("ad", json!({})), calculator()).await;
        let err = result.unwrap_err();
        assert_eq!(harness_code(&err), "TOOL_NOT_FOUND");
        let details = err.downcast_ref::<HarnessError>().unwrap().details();
        assert_eq!(details["suggestion"], "add");
    }

    #[tokio::test]
    async fn schema_violation_blocks_the_call() {
        let client = calculator();
        let (result, _) = run(ToolTest::new("add", json!({"a": 1})), client.clone()).await;
        let err = result.unwrap_err();
        assert_eq!(harness_code(&err), "SCHEMA_VALIDATION_FAILED");
        assert!(err.to_string().contains("'b'"));
        assert!(client.tool_calls().is_empty());
    }

    #[tokio::test]
    async fn schema_validation_can_be_disabled() {
        let context = RunContext::new();
        let settings = ToolTestSettings {
            validate_schemas: false,
            ..Default::default()
        };
        let result = run_tool_test(
            ToolTest::new("add", json!({"a": 1})),
            session(calculator()),
            settings,
            context,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn error_result_is_tool_execution_failure() {
        let client = MockClient::new().with_tool("fail", json!({"type": "object"}), |_| {
            Ok(json!({"content": [{"type": "text", "text": "disk full"}], "isError": true}))
        });
        let (result, _) = run(ToolTest::new("fail", json!({})), client).await;
        let err = result.unwrap_err();
        assert_eq!(harness_code(&err), "TOOL_EXECUTION_FAILED");
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn expected_error_result_passes() {
        let client = MockClient::new().with_tool("fail", json!({"type": "object"}), |_| {
            Ok(json!({"content": [{"type": "text", "text": "nope"}], "isError": true}))
        });
        let config = ToolTestConfig {
            tool: "fail".into(),
            arguments: json!({}),
            expect_text: None,
            expect_success: false,
            min_content_items: None,
            max_duration_ms: None,
        };
        let (result, _) = run(ToolTest::from(&config), client).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn non_array_content_is_invalid_response() {
        let client = MockClient::new().with_tool("odd", json!({"type": "object"}), |_| {
            Ok(json!({"content": "plain string"}))
        });
        let (result, _) = run(ToolTest::new("odd", json!({})), client).await;
        let err = result.unwrap_err();
        assert_eq!(harness_code(&err), "INVALID_RESPONSE");
        let details = err.downcast_ref::<HarnessError>().unwrap().details();
        assert_eq!(details["response"]["content"], "plain string");
    }

    #[tokio::test]
    async fn first_failing_assertion_stops_the_rest() {
        let test = ToolTest::new("add", json!({"a": 2, "b": 3}))
            .with_assertion(Assertion::not_error())
            .with_assertion(Assertion::contains_text("6"))
            .with_assertion(Assertion::min_content_items(1));
        let (result, context) = run(test, calculator()).await;
        let err = result.unwrap_err();
        let details = err.downcast_ref::<HarnessError>().unwrap().details();
        assert_eq!(details["assertionIndex"], 1);
        assert_eq!(context.assertions_run(), 2);
    }

    #[tokio::test]
    async fn slow_call_warns_without_failing() {
        let test = ToolTest::new("add", json!({"a": 1, "b": 1}))
            .with_max_duration(Duration::from_millis(1));
        let client = calculator().with_delay(Duration::from_millis(20));
        let (result, _) = run(test, client).await;
        assert_eq!(result.unwrap()["thresholdExceeded"], true);
    }

    #[test]
    fn config_builds_assertions_in_order() {
        let config = ToolTestConfig {
            tool: "add".into(),
            arguments: json!({"a": 1}),
            expect_text: Some("2".into()),
            expect_success: true,
            min_content_items: Some(1),
            max_duration_ms: Some(250),
        };
        let test = ToolTest::from(&config);
        let names: Vec<&str> = test.assertions.iter().map(Assertion::name).collect();
        assert_eq!(names, vec!["not_error", "contains_text(\"2\")", "min_content_items(1)"]);
        assert_eq!(test.max_duration, Some(Duration::from_millis(250)));
    }
}
