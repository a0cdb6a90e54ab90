//! Single-test execution under a timeout

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::errors::HarnessError;

use super::connection::Session;
use super::context::RunContext;
use super::results::{TestError, TestResult, TestStatus};
use super::tools::{run_tool_test, ToolTest, ToolTestSettings};

/// Default per-test timeout
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Future returned by a test function
pub type TestFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Caller-supplied test body
pub type TestFn = Arc<dyn Fn(Arc<Session>) -> TestFuture + Send + Sync>;

/// A test runnable against a session
#[derive(Clone)]
pub enum TestCase {
    Function { name: String, func: TestFn },
    Tool(ToolTest),
}

impl TestCase {
    /// Wrap an async closure as a test
    pub fn function<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        TestCase::Function {
            name: name.into(),
            func: Arc::new(move |session| func(session).boxed()),
        }
    }

    pub fn name(&self) -> String {
        match self {
            TestCase::Function { name, .. } => name.clone(),
            TestCase::Tool(test) => test.name(),
        }
    }
}

impl From<ToolTest> for TestCase {
    fn from(test: ToolTest) -> Self {
        TestCase::Tool(test)
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestCase::Function { name, .. } => f.debug_tuple("Function").field(name).finish(),
            TestCase::Tool(test) => f.debug_tuple("Tool").field(test).finish(),
        }
    }
}

/// Runs tests and turns every outcome into a [`TestResult`]
#[derive(Clone)]
pub struct TestExecutor {
    timeout: Duration,
    context: Arc<RunContext>,
    tool_settings: ToolTestSettings,
}

impl TestExecutor {
    pub fn new(timeout: Duration, context: Arc<RunContext>) -> Self {
        Self {
            timeout,
            context,
            tool_settings: ToolTestSettings::default(),
        }
    }

    pub fn with_tool_settings(mut self, settings: ToolTestSettings) -> Self {
        self.tool_settings = settings;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    /// Run any test case against a session
    pub async fn execute(&self, case: &TestCase, session: Arc<Session>) -> TestResult {
        match case {
            TestCase::Function { name, func } => self.run(name, func(session)).await,
            TestCase::Tool(test) => {
                let future = run_tool_test(
                    test.clone(),
                    session,
                    self.tool_settings,
                    Arc::clone(&self.context),
                );
                self.run(&test.name(), future).await
            }
        }
    }

    /// Run a test future under the timeout
    ///
    /// The future runs on its own task. On timeout the task is detached and
    /// whatever it produces later is discarded.
    pub async fn run<F>(&self, name: &str, test: F) -> TestResult
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.context.record_test();
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();

        let handle = tokio::spawn(test);
        let outcome = match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(e))) => Err(TestError::from_anyhow(&e)),
            Ok(Err(join_error)) => Err(TestError::message(describe_join_error(join_error))),
            Err(_) => Err(TestError::from_harness(&HarnessError::Timeout {
                test: name.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(data) => {
                tracing::debug!("{} passed in {}ms", name, duration_ms);
                TestResult {
                    name: name.to_string(),
                    started_at,
                    status: TestStatus::Passed,
                    duration_ms,
                    data: (!data.is_null()).then_some(data),
                    error: None,
                }
            }
            Err(error) => {
                tracing::debug!("{} failed in {}ms: {}", name, duration_ms, error.message);
                TestResult {
                    name: name.to_string(),
                    started_at,
                    status: TestStatus::Failed,
                    duration_ms,
                    data: None,
                    error: Some(error),
                }
            }
        }
    }
}

fn describe_join_error(error: tokio::task::JoinError) -> String {
    if !error.is_panic() {
        return "Test task was cancelled".to_string();
    }
    let panic = error.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("Test panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::transport::TransportDescriptor;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn session() -> Arc<Session> {
        let descriptor = TransportDescriptor::stdio("mock", vec![], BTreeMap::new()).unwrap();
        Arc::new(Session::new(
            descriptor,
            Arc::new(MockClient::new().with_text_tool("echo", "hi")),
        ))
    }

    fn executor(timeout: Duration) -> TestExecutor {
        TestExecutor::new(timeout, RunContext::new())
    }

    #[tokio::test]
    async fn passing_function_records_data() {
        let case = TestCase::function("ok", |_| async { Ok(json!({"value": 1})) });
        let result = executor(DEFAULT_TEST_TIMEOUT).execute(&case, session()).await;
        assert!(result.passed());
        assert_eq!(result.data.unwrap()["value"], 1);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn failing_function_records_message() {
        let case = TestCase::function("bad", |_| async { anyhow::bail!("nope") });
        let result = executor(DEFAULT_TEST_TIMEOUT).execute(&case, session()).await;
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.error.unwrap().message, "nope");
    }

    #[tokio::test]
    async fn harness_errors_keep_their_code() {
        let case = TestCase::function("cfg", |_| async {
            Err(HarnessError::invalid_config("missing url").into())
        });
        let result = executor(DEFAULT_TEST_TIMEOUT).execute(&case, session()).await;
        let error = result.error.unwrap();
        assert_eq!(error.code.as_deref(), Some("INVALID_CONFIG"));
        assert_eq!(error.details.unwrap()["message"], "missing url");
    }

    #[tokio::test]
    async fn slow_test_times_out() {
        let executor = executor(Duration::from_millis(50));
        let case = TestCase::function("slow", |_| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Value::Null)
        });
        let result = executor.execute(&case, session()).await;
        let error = result.error.unwrap();
        assert_eq!(error.code.as_deref(), Some("TEST_TIMEOUT"));
        assert_eq!(error.details.unwrap()["timeoutMs"], 50);
        assert!(result.duration_ms >= 50);
        assert!(result.duration_ms < 500);
    }

    #[tokio::test]
    async fn test_within_timeout_passes() {
        let executor = executor(Duration::from_millis(500));
        let case = TestCase::function("quick", |_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Value::Null)
        });
        let result = executor.execute(&case, session()).await;
        assert!(result.passed());
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let case = TestCase::function("panic", |_| async {
            if true {
                panic!("kaboom");
            }
            Ok(Value::Null)
        });
        let result = executor(DEFAULT_TEST_TIMEOUT).execute(&case, session()).await;
        assert!(result.error.unwrap().message.contains("kaboom"));
    }

    #[tokio::test]
    async fn every_execution_counts_as_a_test() {
        let executor = executor(DEFAULT_TEST_TIMEOUT);
        let ok = TestCase::function("ok", |_| async { Ok(Value::Null) });
        let tool = TestCase::from(ToolTest::new("echo", json!({})));
        executor.execute(&ok, session()).await;
        let tool_result = executor.execute(&tool, session()).await;
        assert!(tool_result.passed());
        assert_eq!(tool_result.name, "Tool: echo");
        assert_eq!(executor.context().tests_run(), 2);
    }

    #[tokio::test]
    async fn function_receives_the_session() {
        let case = TestCase::function("tools", |session: Arc<Session>| async move {
            let tools = session.client().list_tools().await?;
            Ok(json!({"count": tools.len()}))
        });
        let result = executor(DEFAULT_TEST_TIMEOUT).execute(&case, session()).await;
        assert_eq!(result.data.unwrap()["count"], 1);
    }
}
