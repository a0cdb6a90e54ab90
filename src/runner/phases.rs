//! Built-in test phases
//!
//! Each phase is a list of [`TestCase`]s run in order through the executor.
//! Thresholds produce warnings and flags in the test data, never failures.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde_json::{json, Value};

use crate::client::{is_method_not_found, ProtocolClient};
use crate::config::{PerformanceSettings, PhaseSettings, StabilitySettings, Thresholds};

use super::connection::Session;
use super::executor::TestCase;

pub const DISCOVERY_TOOLS: &str = "Discovery: list tools";
pub const DISCOVERY_RESOURCES: &str = "Discovery: list resources";
pub const DISCOVERY_PROMPTS: &str = "Discovery: list prompts";
pub const STABILITY_SEQUENTIAL: &str = "Stability: sequential requests";
pub const STABILITY_CONCURRENT: &str = "Stability: concurrent requests";
pub const STABILITY_MEMORY: &str = "Stability: memory usage";
pub const COMPLIANCE_TOOLS: &str = "Compliance: tool definitions";
pub const COMPLIANCE_RESOURCES: &str = "Compliance: resource definitions";
pub const COMPLIANCE_PROMPTS: &str = "Compliance: prompt definitions";
pub const COMPLIANCE_UNKNOWN_TOOL: &str = "Compliance: unknown tool rejected";
pub const PERFORMANCE_DISCOVERY: &str = "Performance: discovery latency";
pub const PERFORMANCE_CONCURRENT: &str = "Performance: concurrent throughput";
pub const ERROR_UNKNOWN_TOOL: &str = "Error handling: unknown tool";
pub const ERROR_MALFORMED_ARGUMENTS: &str = "Error handling: malformed arguments";

/// Tool name no server is expected to advertise
pub const NONEXISTENT_TOOL: &str = "__mcp_harness_nonexistent_tool__";

/// Nesting depth of the malformed arguments payload
pub const MALFORMED_DEPTH: usize = 64;

/// Suite phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovery,
    Stability,
    Compliance,
    Performance,
    ErrorHandling,
    CustomTests,
    ToolTests,
    TransportSpecificTests,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Discovery,
        Phase::Stability,
        Phase::Compliance,
        Phase::Performance,
        Phase::ErrorHandling,
        Phase::CustomTests,
        Phase::ToolTests,
        Phase::TransportSpecificTests,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Discovery => "Discovery",
            Phase::Stability => "Stability",
            Phase::Compliance => "Compliance",
            Phase::Performance => "Performance",
            Phase::ErrorHandling => "Error handling",
            Phase::CustomTests => "Custom tests",
            Phase::ToolTests => "Tool tests",
            Phase::TransportSpecificTests => "Transport-specific tests",
        }
    }

    pub fn enabled(&self, settings: &PhaseSettings) -> bool {
        match self {
            Phase::Discovery => settings.discovery,
            Phase::Stability => settings.stability,
            Phase::Compliance => settings.compliance,
            Phase::Performance => settings.performance,
            Phase::ErrorHandling => settings.error_handling,
            Phase::CustomTests => settings.custom,
            Phase::ToolTests => settings.tool_tests,
            Phase::TransportSpecificTests => settings.transport_specific,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Latency statistics
// ============================================================================

/// Summary of a set of latency samples, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Population variance, ms²
    pub variance: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                average: 0.0,
                min: 0.0,
                max: 0.0,
                variance: 0.0,
            };
        }
        let n = samples.len() as f64;
        let average = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - average).powi(2)).sum::<f64>() / n;
        Self {
            average,
            min: samples.iter().copied().fold(f64::INFINITY, f64::min),
            max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            variance,
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Run `count` list_tools calls one after another, failing on the first error
async fn sequential_list_tools(client: &dyn ProtocolClient, count: usize) -> Result<Vec<f64>> {
    let mut samples = Vec::with_capacity(count);
    for i in 0..count {
        let start = Instant::now();
        client
            .list_tools()
            .await
            .with_context(|| format!("call {} of {} failed", i + 1, count))?;
        samples.push(elapsed_ms(start));
    }
    Ok(samples)
}

/// Run `count` list_tools calls at once; returns (successful, failed)
async fn concurrent_list_tools(client: &dyn ProtocolClient, count: usize) -> (usize, usize) {
    let outcomes = join_all((0..count).map(|_| client.list_tools())).await;
    let successful = outcomes.iter().filter(|o| o.is_ok()).count();
    if let Some(Err(e)) = outcomes.iter().find(|o| o.is_err()) {
        tracing::debug!("Concurrent call failed: {:#}", e);
    }
    (successful, count - successful)
}

/// How a server turned down a call; an error if it accepted it
async fn expect_rejection(client: &dyn ProtocolClient, tool: &str, arguments: Value) -> Result<Value> {
    match client.call_tool(tool, arguments).await {
        Err(e) => Ok(json!({"rejected": true, "via": "error", "error": format!("{:#}", e)})),
        Ok(raw) if raw.get("isError").and_then(Value::as_bool) == Some(true) => {
            Ok(json!({"rejected": true, "via": "isError"}))
        }
        Ok(_) => anyhow::bail!("server accepted a call that should have been rejected"),
    }
}

/// `[[[...]]]` nested `depth` levels deep
pub fn malformed_arguments(depth: usize) -> Value {
    (0..depth).fold(Value::Array(Vec::new()), |inner, _| Value::Array(vec![inner]))
}

// ============================================================================
// Discovery
// ============================================================================

pub fn discovery_tests() -> Vec<TestCase> {
    vec![
        TestCase::function(DISCOVERY_TOOLS, |session: Arc<Session>| async move {
            let tools = session.client().list_tools().await?;
            let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
            Ok(json!({"count": tools.len(), "supported": true, "tools": names}))
        }),
        TestCase::function(DISCOVERY_RESOURCES, |session: Arc<Session>| async move {
            match session.client().list_resources().await {
                Ok(resources) => Ok(json!({"count": resources.len(), "supported": true})),
                Err(e) if is_method_not_found(&e) => Ok(json!({"count": 0, "supported": false})),
                Err(e) => Err(e),
            }
        }),
        TestCase::function(DISCOVERY_PROMPTS, |session: Arc<Session>| async move {
            match session.client().list_prompts().await {
                Ok(prompts) => Ok(json!({"count": prompts.len(), "supported": true})),
                Err(e) if is_method_not_found(&e) => Ok(json!({"count": 0, "supported": false})),
                Err(e) => Err(e),
            }
        }),
    ]
}

// ============================================================================
// Stability
// ============================================================================

pub fn stability_tests(settings: &StabilitySettings, thresholds: &Thresholds) -> Vec<TestCase> {
    let sequential = settings.sequential_calls;
    let concurrent = settings.concurrent_calls;
    let variance_limit = thresholds.stability_variance;

    let mut tests = vec![
        TestCase::function(STABILITY_SEQUENTIAL, move |session: Arc<Session>| async move {
            let samples = sequential_list_tools(session.client(), sequential).await?;
            let stats = LatencyStats::from_samples(&samples);
            if stats.variance > variance_limit {
                tracing::warn!(
                    "Latency variance {:.1}ms² exceeds {:.1}ms²",
                    stats.variance,
                    variance_limit
                );
            }
            Ok(json!({
                "calls": sequential,
                "averageMs": stats.average,
                "minMs": stats.min,
                "maxMs": stats.max,
                "variance": stats.variance,
                "latenciesMs": samples,
            }))
        }),
        TestCase::function(STABILITY_CONCURRENT, move |session: Arc<Session>| async move {
            let (successful, failed) = concurrent_list_tools(session.client(), concurrent).await;
            if concurrent > 0 && successful == 0 {
                anyhow::bail!("all {} concurrent requests failed", concurrent);
            }
            Ok(json!({"total": concurrent, "successful": successful, "failed": failed}))
        }),
    ];

    if settings.memory_check {
        let growth_limit = thresholds.memory_growth_mb;
        tests.push(TestCase::function(
            STABILITY_MEMORY,
            move |session: Arc<Session>| async move {
                let Some(before) = resident_memory_mb() else {
                    return Ok(json!({"supported": false}));
                };
                sequential_list_tools(session.client(), sequential).await?;
                let after = resident_memory_mb().unwrap_or(before);
                let growth = after - before;
                let exceeded = growth > growth_limit;
                if exceeded {
                    tracing::warn!(
                        "Resident memory grew {:.1}MB (threshold {:.1}MB)",
                        growth,
                        growth_limit
                    );
                }
                Ok(json!({
                    "supported": true,
                    "beforeMb": before,
                    "afterMb": after,
                    "growthMb": growth,
                    "thresholdExceeded": exceeded,
                }))
            },
        ));
    }

    tests
}

/// Resident set size of this process from `/proc/self/status`
fn resident_memory_mb() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    vm_rss_mb(&status)
}

/// `VmRSS` is reported in kB regardless of the kernel page size
fn vm_rss_mb(status: &str) -> Option<f64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let mut fields = line["VmRSS:".len()..].split_whitespace();
    let value: f64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") | None => Some(value / 1024.0),
        Some(_) => None,
    }
}

// ============================================================================
// Compliance
// ============================================================================

pub fn compliance_tests() -> Vec<TestCase> {
    vec![
        TestCase::function(COMPLIANCE_TOOLS, |session: Arc<Session>| async move {
            let tools = session.client().list_tools().await?;
            let mut problems = Vec::new();
            for (i, tool) in tools.iter().enumerate() {
                if tool.name.trim().is_empty() {
                    problems.push(format!("tool #{} has an empty name", i));
                }
                if !tool.input_schema.is_object() {
                    problems.push(format!("tool '{}' has no object inputSchema", tool.name));
                }
            }
            if !problems.is_empty() {
                anyhow::bail!("malformed tool definitions: {}", problems.join("; "));
            }
            Ok(json!({"checked": tools.len()}))
        }),
        TestCase::function(COMPLIANCE_RESOURCES, |session: Arc<Session>| async move {
            let resources = match session.client().list_resources().await {
                Ok(resources) => resources,
                Err(e) if is_method_not_found(&e) => return Ok(json!({"supported": false})),
                Err(e) => return Err(e),
            };
            let bad: Vec<usize> = resources
                .iter()
                .enumerate()
                .filter(|(_, r)| r.uri.trim().is_empty() || r.name.trim().is_empty())
                .map(|(i, _)| i)
                .collect();
            if !bad.is_empty() {
                anyhow::bail!("resources missing uri or name at positions {:?}", bad);
            }
            Ok(json!({"supported": true, "checked": resources.len()}))
        }),
        TestCase::function(COMPLIANCE_PROMPTS, |session: Arc<Session>| async move {
            let prompts = match session.client().list_prompts().await {
                Ok(prompts) => prompts,
                Err(e) if is_method_not_found(&e) => return Ok(json!({"supported": false})),
                Err(e) => return Err(e),
            };
            if prompts.iter().any(|p| p.name.trim().is_empty()) {
                anyhow::bail!("prompt with an empty name");
            }
            Ok(json!({"supported": true, "checked": prompts.len()}))
        }),
        TestCase::function(COMPLIANCE_UNKNOWN_TOOL, |session: Arc<Session>| async move {
            expect_rejection(session.client(), NONEXISTENT_TOOL, json!({})).await
        }),
    ]
}

// ============================================================================
// Performance
// ============================================================================

pub fn performance_tests(settings: &PerformanceSettings, thresholds: &Thresholds) -> Vec<TestCase> {
    let iterations = settings.iterations;
    let concurrent = settings.concurrent;
    let limit_ms = thresholds.discovery_ms as f64;

    vec![
        TestCase::function(PERFORMANCE_DISCOVERY, move |session: Arc<Session>| async move {
            let samples = sequential_list_tools(session.client(), iterations).await?;
            let stats = LatencyStats::from_samples(&samples);
            let exceeded = stats.average > limit_ms;
            if exceeded {
                tracing::warn!(
                    "Average discovery latency {:.1}ms exceeds {}ms",
                    stats.average,
                    limit_ms
                );
            }
            Ok(json!({
                "iterations": iterations,
                "averageMs": stats.average,
                "minMs": stats.min,
                "maxMs": stats.max,
                "thresholdMs": limit_ms,
                "thresholdExceeded": exceeded,
            }))
        }),
        TestCase::function(PERFORMANCE_CONCURRENT, move |session: Arc<Session>| async move {
            let start = Instant::now();
            let (successful, failed) = concurrent_list_tools(session.client(), concurrent).await;
            let total_ms = elapsed_ms(start);
            if concurrent > 0 && successful == 0 {
                anyhow::bail!("all {} concurrent requests failed", concurrent);
            }
            let throughput = if total_ms > 0.0 {
                successful as f64 / (total_ms / 1000.0)
            } else {
                successful as f64
            };
            Ok(json!({
                "requests": concurrent,
                "successful": successful,
                "failed": failed,
                "totalMs": total_ms,
                "requestsPerSecond": throughput,
            }))
        }),
    ]
}

// ============================================================================
// Error handling
// ============================================================================

pub fn error_handling_tests() -> Vec<TestCase> {
    vec![
        TestCase::function(ERROR_UNKNOWN_TOOL, |session: Arc<Session>| async move {
            expect_rejection(session.client(), NONEXISTENT_TOOL, json!({})).await
        }),
        TestCase::function(ERROR_MALFORMED_ARGUMENTS, |session: Arc<Session>| async move {
            let client = session.client();
            let tools = client.list_tools().await?;
            let target = tools
                .first()
                .map(|t| t.name.clone())
                .unwrap_or_else(|| NONEXISTENT_TOOL.to_string());

            let mut data =
                expect_rejection(client, &target, malformed_arguments(MALFORMED_DEPTH)).await?;
            client
                .list_tools()
                .await
                .context("server stopped answering after malformed arguments")?;

            data["tool"] = json!(target);
            data["depth"] = json!(MALFORMED_DEPTH);
            data["recovered"] = json!(true);
            Ok(data)
        }),
    ]
}
