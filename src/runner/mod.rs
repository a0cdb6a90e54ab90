//! Suite runner
//!
//! Connects to a target, runs the enabled phases in order against one
//! [`Session`], and collects the outcome as a [`SuiteResult`]. Multi-target
//! runs are sequential and share one [`RunContext`].

pub mod connection;
pub mod context;
pub mod executor;
pub mod phases;
pub mod results;
pub mod schema;
pub mod tools;

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::config::{HarnessConfig, TargetConfig};
use crate::detect::{resolve_auto, UNKNOWN_LABEL};
use crate::transport::{TransportConfig, TransportDescriptor, TransportType};
use crate::ui::Printer;

pub use connection::{ClientFactory, ConnectionManager, RetryPolicy, Session};
pub use context::{RunContext, RunMetrics};
pub use executor::{TestCase, TestExecutor, DEFAULT_TEST_TIMEOUT};
pub use phases::Phase;
pub use results::{SuiteMetrics, SuiteResult, TestError, TestResult, TestStatus};
pub use tools::{Assertion, ToolTest, ToolTestSettings};

/// Runs suites against targets
pub struct SuiteRunner {
    config: HarnessConfig,
    context: Arc<RunContext>,
    custom_tests: Vec<TestCase>,
    transport_tests: Vec<(TransportType, TestCase)>,
    tool_tests: Vec<ToolTest>,
    client_factory: Option<ClientFactory>,
    printer: Printer,
}

impl SuiteRunner {
    /// Runner for a configuration. `[[tools]]` entries become tool tests.
    pub fn new(config: HarnessConfig) -> Self {
        let tool_tests = config.tools.iter().map(ToolTest::from).collect();
        Self {
            config,
            context: RunContext::new(),
            custom_tests: Vec::new(),
            transport_tests: Vec::new(),
            tool_tests,
            client_factory: None,
            printer: Printer::new(),
        }
    }

    pub fn with_custom_test(mut self, test: TestCase) -> Self {
        self.custom_tests.push(test);
        self
    }

    /// Test that only runs when the session uses `transport`
    pub fn with_transport_test(mut self, transport: TransportType, test: TestCase) -> Self {
        self.transport_tests.push((transport, test));
        self
    }

    pub fn with_tool_test(mut self, test: ToolTest) -> Self {
        self.tool_tests.push(test);
        self
    }

    /// Replace how clients are built for each connection attempt
    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.client_factory = Some(factory);
        self
    }

    pub fn with_printer(mut self, printer: Printer) -> Self {
        self.printer = printer;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    /// Run every configured target, one after another
    pub async fn run_configured(&self) -> Vec<SuiteResult> {
        self.run_targets(&self.config.targets).await
    }

    pub async fn run_targets(&self, targets: &[TargetConfig]) -> Vec<SuiteResult> {
        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            results.push(self.run_target(target).await);
        }
        results
    }

    /// Resolve `auto` if needed, then run the suite
    ///
    /// Detection and descriptor errors become a failed suite, never a panic
    /// or an early return.
    pub async fn run_target(&self, target: &TargetConfig) -> SuiteResult {
        let name = self.suite_name(target);
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();

        match resolve_auto(target).await {
            Ok(descriptor) => {
                if target.is_auto() {
                    tracing::debug!("Detected {} for {}", descriptor.transport_type(), name);
                }
                self.run_timed(&name, &descriptor, started_at, start).await
            }
            Err(e) => {
                tracing::error!("Suite {} could not start: {}", name, e);
                let transport = if target.is_auto() {
                    UNKNOWN_LABEL.to_string()
                } else {
                    target.transport.clone()
                };
                SuiteResult::new(
                    name,
                    transport,
                    unresolved_descriptor(target),
                    Vec::new(),
                    Some(TestError::from_harness(&e)),
                    started_at,
                    start.elapsed().as_millis() as u64,
                )
            }
        }
    }

    /// Connect to a typed descriptor and run the suite
    pub async fn run(&self, name: &str, descriptor: &TransportDescriptor) -> SuiteResult {
        let started_at = chrono::Utc::now().to_rfc3339();
        self.run_timed(name, descriptor, started_at, Instant::now())
            .await
    }

    /// Run the phases against an already connected session
    pub async fn run_session(&self, name: &str, session: Arc<Session>) -> SuiteResult {
        let started_at = chrono::Utc::now().to_rfc3339();
        self.run_phases(name, session, started_at, Instant::now())
            .await
    }

    async fn run_timed(
        &self,
        name: &str,
        descriptor: &TransportDescriptor,
        started_at: String,
        start: Instant,
    ) -> SuiteResult {
        if self.config.harness.verbose {
            self.printer.header(&format!(
                "Suite {} ({} {})",
                name,
                descriptor.transport_type(),
                descriptor.target()
            ));
        }

        match self.connection_manager().connect(descriptor).await {
            Ok(session) => {
                self.run_phases(name, Arc::new(session), started_at, start)
                    .await
            }
            Err(e) => {
                tracing::error!("Suite {} failed to connect: {}", name, e);
                SuiteResult::new(
                    name,
                    descriptor.transport_type().as_str(),
                    descriptor.sanitized(),
                    Vec::new(),
                    Some(TestError::from_harness(&e)),
                    started_at,
                    start.elapsed().as_millis() as u64,
                )
            }
        }
    }

    async fn run_phases(
        &self,
        name: &str,
        session: Arc<Session>,
        started_at: String,
        start: Instant,
    ) -> SuiteResult {
        let executor = TestExecutor::new(self.config.test_timeout(), Arc::clone(&self.context))
            .with_tool_settings(ToolTestSettings {
                validate_schemas: self.config.harness.validate_schemas,
                call_threshold: std::time::Duration::from_millis(
                    self.config.thresholds.tool_call_ms,
                ),
            });

        let mut tests = Vec::new();
        let mut error = None;

        for phase in Phase::ALL {
            if !phase.enabled(&self.config.phases) {
                tracing::debug!("Skipping disabled phase {}", phase);
                continue;
            }
            let cases = self.phase_tests(phase, session.transport_type());
            if cases.is_empty() {
                continue;
            }

            tracing::debug!("Phase {} ({} tests)", phase, cases.len());
            if self.config.harness.verbose {
                self.printer.phase(phase.name());
            }

            if let Err(e) = self
                .run_phase(phase, &cases, &executor, &session, &mut tests)
                .await
            {
                tracing::error!("Phase {} aborted: {}", phase, e.message);
                error = Some(e);
                break;
            }
        }

        if let Err(e) = session.close().await {
            tracing::warn!("Closing session for {} failed: {:#}", name, e);
        }

        let result = SuiteResult::new(
            name,
            session.transport_type().as_str(),
            session.descriptor().sanitized(),
            tests,
            error,
            started_at,
            start.elapsed().as_millis() as u64,
        );
        tracing::debug!(
            "Suite {} {}: {}/{} tests passed",
            name,
            if result.passed() { "passed" } else { "failed" },
            result.metrics.passed,
            result.metrics.total
        );
        result
    }

    /// Run one phase's tests in order
    ///
    /// Test failures are recorded and the phase continues. A session that
    /// is closed underneath the phase aborts it.
    async fn run_phase(
        &self,
        phase: Phase,
        cases: &[TestCase],
        executor: &TestExecutor,
        session: &Arc<Session>,
        tests: &mut Vec<TestResult>,
    ) -> Result<(), TestError> {
        for case in cases {
            if session.is_closed() {
                return Err(TestError::message(format!(
                    "{} phase aborted: session closed before '{}'",
                    phase,
                    case.name()
                )));
            }
            let result = executor.execute(case, Arc::clone(session)).await;
            if self.config.harness.verbose {
                self.printer.test_result(&result);
            }
            tests.push(result);
        }
        Ok(())
    }

    fn phase_tests(&self, phase: Phase, transport: TransportType) -> Vec<TestCase> {
        let config = &self.config;
        match phase {
            Phase::Discovery => phases::discovery_tests(),
            Phase::Stability => phases::stability_tests(&config.stability, &config.thresholds),
            Phase::Compliance => phases::compliance_tests(),
            Phase::Performance => {
                phases::performance_tests(&config.performance, &config.thresholds)
            }
            Phase::ErrorHandling => phases::error_handling_tests(),
            Phase::CustomTests => self.custom_tests.clone(),
            Phase::ToolTests => self.tool_tests.iter().cloned().map(TestCase::from).collect(),
            Phase::TransportSpecificTests => self
                .transport_tests
                .iter()
                .filter(|(t, _)| *t == transport)
                .map(|(_, case)| case.clone())
                .collect(),
        }
    }

    fn connection_manager(&self) -> ConnectionManager {
        let transport_config = TransportConfig {
            timeout: self.config.test_timeout(),
            ..TransportConfig::default()
        };
        let manager = ConnectionManager::new(RetryPolicy::from(&self.config.retry), Arc::clone(&self.context))
            .with_transport_config(transport_config);
        match &self.client_factory {
            Some(factory) => manager.with_client_factory(Arc::clone(factory)),
            None => manager,
        }
    }

    fn suite_name(&self, target: &TargetConfig) -> String {
        match &self.config.harness.suite_name {
            Some(suite) => format!("{} ({})", suite, target.display_name()),
            None => target.display_name(),
        }
    }
}

/// Descriptor summary for a target that never became a typed descriptor
fn unresolved_descriptor(target: &TargetConfig) -> Value {
    let location = target
        .url
        .clone()
        .or_else(|| target.command.clone())
        .unwrap_or_default();
    json!({
        "type": target.transport,
        "target": location,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::client::ProtocolClient;
    use crate::config::{PhaseSettings, RetrySettings};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn quick_config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.harness.timeout_ms = 2_000;
        config.retry = RetrySettings {
            attempts: 2,
            delay_ms: 1,
        };
        config.stability.sequential_calls = 3;
        config.stability.concurrent_calls = 3;
        config.performance.iterations = 2;
        config.performance.concurrent = 2;
        config
    }

    fn factory(client: MockClient) -> ClientFactory {
        Arc::new(move |_, _| Ok(Arc::new(client.clone()) as Arc<dyn ProtocolClient>))
    }

    fn stdio_descriptor() -> TransportDescriptor {
        TransportDescriptor::stdio("mock-server", vec![], BTreeMap::new()).unwrap()
    }

    fn echo_client() -> MockClient {
        MockClient::new().with_tool(
            "echo",
            json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
            |args| {
                let text = args["text"].as_str().unwrap_or_default().to_string();
                Ok(json!({"content": [{"type": "text", "text": text}]}))
            },
        )
    }

    #[tokio::test]
    async fn full_suite_passes_against_well_behaved_server() {
        let client = echo_client();
        let runner = SuiteRunner::new(quick_config())
            .with_client_factory(factory(client.clone()))
            .with_tool_test(
                ToolTest::new("echo", json!({"text": "hello"}))
                    .with_assertion(Assertion::contains_text("hello")),
            );

        let result = runner.run("mock", &stdio_descriptor()).await;

        assert!(result.passed(), "{:#?}", result);
        assert_eq!(result.transport, "stdio");
        assert!(result.test(phases::DISCOVERY_TOOLS).is_some());
        assert!(result.test("Tool: echo").unwrap().passed());
        assert_eq!(client.close_count(), 1);
        assert_eq!(runner.context().connection_attempts(), 1);
        assert_eq!(runner.context().tests_run(), result.tests.len() as u64);
    }

    #[tokio::test]
    async fn connection_failure_fails_suite_after_retries() {
        let client = MockClient::new().failing_connect("refused");
        let runner = SuiteRunner::new(quick_config()).with_client_factory(factory(client));

        let result = runner.run("down", &stdio_descriptor()).await;

        assert!(!result.passed());
        assert!(result.is_connection_failure());
        assert!(result.tests.is_empty());
        assert_eq!(runner.context().connection_attempts(), 2);
    }

    #[tokio::test]
    async fn disabled_phases_are_skipped() {
        let mut config = quick_config();
        config.phases = PhaseSettings {
            discovery: true,
            stability: false,
            compliance: false,
            performance: false,
            error_handling: false,
            custom: false,
            tool_tests: false,
            transport_specific: false,
        };
        let runner = SuiteRunner::new(config).with_client_factory(factory(echo_client()));

        let result = runner.run("discovery only", &stdio_descriptor()).await;

        assert_eq!(result.tests.len(), 3);
        assert!(result.tests.iter().all(|t| t.name.starts_with("Discovery")));
    }

    #[tokio::test]
    async fn transport_specific_tests_match_session_transport() {
        let mut config = quick_config();
        config.phases = PhaseSettings {
            discovery: false,
            stability: false,
            compliance: false,
            performance: false,
            error_handling: false,
            custom: false,
            tool_tests: false,
            transport_specific: true,
        };
        let runner = SuiteRunner::new(config)
            .with_client_factory(factory(echo_client()))
            .with_transport_test(
                TransportType::Stdio,
                TestCase::function("stdio only", |_| async { Ok(Value::Null) }),
            )
            .with_transport_test(
                TransportType::Sse,
                TestCase::function("sse only", |_| async { Ok(Value::Null) }),
            );

        let result = runner.run("stdio", &stdio_descriptor()).await;

        let names: Vec<&str> = result.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["stdio only"]);
    }

    #[tokio::test]
    async fn closed_session_aborts_remaining_phases() {
        let mut config = quick_config();
        config.phases.stability = false;
        config.phases.compliance = false;
        config.phases.performance = false;
        config.phases.error_handling = false;
        let runner = SuiteRunner::new(config)
            .with_client_factory(factory(echo_client()))
            .with_custom_test(TestCase::function("closes session", |session: Arc<Session>| async move {
                session.close().await?;
                Ok(Value::Null)
            }))
            .with_custom_test(TestCase::function("never runs", |_| async { Ok(Value::Null) }))
            .with_tool_test(ToolTest::new("echo", json!({"text": "x"})));

        let result = runner.run("abort", &stdio_descriptor()).await;

        assert!(!result.passed());
        assert!(result.test("never runs").is_none());
        assert!(result.test("Tool: echo").is_none());
        assert!(result.error.unwrap().message.contains("session closed"));
    }

    #[tokio::test]
    async fn failed_test_fails_suite() {
        let mut config = quick_config();
        config.phases.stability = false;
        config.phases.performance = false;
        let runner = SuiteRunner::new(config)
            .with_client_factory(factory(echo_client()))
            .with_tool_test(ToolTest::new("ech", json!({})));

        let result = runner.run("typo", &stdio_descriptor()).await;

        assert!(!result.passed());
        assert!(result.error.is_none());
        let tool = result.test("Tool: ech").unwrap();
        assert_eq!(tool.error.as_ref().unwrap().code.as_deref(), Some("TOOL_NOT_FOUND"));
    }

    #[tokio::test]
    async fn invalid_target_becomes_failed_suite() {
        let runner = SuiteRunner::new(quick_config());
        let target = TargetConfig {
            transport: "stdio".into(),
            ..TargetConfig::default()
        };

        let result = runner.run_target(&target).await;

        assert!(!result.passed());
        assert_eq!(result.transport, "stdio");
        assert_eq!(result.error.unwrap().code.as_deref(), Some("INVALID_CONFIG"));
        assert_eq!(runner.context().connection_attempts(), 0);
    }

    #[tokio::test]
    async fn auto_target_without_url_reports_unknown_transport() {
        let runner = SuiteRunner::new(quick_config());
        let result = runner.run_target(&TargetConfig::default()).await;
        assert_eq!(result.transport, UNKNOWN_LABEL);
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn targets_run_sequentially_and_share_counters() {
        let runner = SuiteRunner::new(quick_config()).with_client_factory(factory(echo_client()));
        let target = TargetConfig {
            name: Some("mock".into()),
            transport: "stdio".into(),
            command: Some("mock-server".into()),
            ..TargetConfig::default()
        };

        let results = runner.run_targets(&[target.clone(), target]).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.passed()));
        assert_eq!(runner.context().connection_attempts(), 2);
    }

    #[test]
    fn suite_name_prefers_configured_name() {
        let mut config = quick_config();
        let target = TargetConfig {
            name: Some("calc".into()),
            ..TargetConfig::default()
        };
        assert_eq!(SuiteRunner::new(config.clone()).suite_name(&target), "calc");
        config.harness.suite_name = Some("nightly".into());
        assert_eq!(SuiteRunner::new(config).suite_name(&target), "nightly (calc)");
    }
}
