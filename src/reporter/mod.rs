//! Run reports
//!
//! A [`Report`] aggregates every suite of a run, the run counters and a list
//! of recommendations. It is written as pretty JSON with camelCase keys and
//! the console summary is rendered from the same value.

pub mod summary;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{HarnessConfig, Thresholds};
use crate::runner::phases::{
    DISCOVERY_PROMPTS, DISCOVERY_RESOURCES, DISCOVERY_TOOLS, STABILITY_SEQUENTIAL,
};
use crate::runner::{RunContext, RunMetrics, SuiteResult};

pub use summary::print_summary;

/// Complete outcome of one harness run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// RFC 3339
    pub timestamp: String,
    pub version: String,
    /// Whole run, in milliseconds
    pub duration: u64,
    pub metrics: RunMetrics,
    pub summary: ReportSummary,
    pub results: Vec<SuiteResult>,
    pub recommendations: Vec<Recommendation>,
}

impl Report {
    pub fn failed_suites(&self) -> usize {
        self.summary.failed
    }

    pub fn passed(&self) -> bool {
        self.summary.failed == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Suites
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub by_transport: BTreeMap<String, TransportSummary>,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
}

impl ReportSummary {
    pub fn from_results(results: &[SuiteResult]) -> Self {
        let mut summary = Self::default();
        for suite in results {
            let entry = summary
                .by_transport
                .entry(suite.transport.clone())
                .or_default();
            entry.total += 1;
            summary.total += 1;
            if suite.passed() {
                entry.passed += 1;
                summary.passed += 1;
            } else {
                entry.failed += 1;
                summary.failed += 1;
            }
            summary.total_tests += suite.metrics.total;
            summary.passed_tests += suite.metrics.passed;
            summary.failed_tests += suite.metrics.failed;
        }
        summary
    }
}

/// Suite counts for one transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationCategory {
    Performance,
    Capability,
    Stability,
    Connectivity,
}

impl std::fmt::Display for RecommendationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RecommendationCategory::Performance => "performance",
            RecommendationCategory::Capability => "capability",
            RecommendationCategory::Stability => "stability",
            RecommendationCategory::Connectivity => "connectivity",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

/// Builds and writes reports
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    thresholds: Thresholds,
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(thresholds: Thresholds, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            thresholds,
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.thresholds.clone(), config.harness.output_dir.clone())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn generate(
        &self,
        results: Vec<SuiteResult>,
        context: &RunContext,
        duration: Duration,
    ) -> Report {
        let recommendations = self.recommendations(&results);
        Report {
            timestamp: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            duration: duration.as_millis() as u64,
            metrics: context.snapshot(),
            summary: ReportSummary::from_results(&results),
            results,
            recommendations,
        }
    }

    /// Write `test-report-<unix millis>.json`, creating the directory
    pub fn write(&self, report: &Report) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create output directory {}", self.output_dir.display())
        })?;

        let file_name = format!("test-report-{}.json", chrono::Utc::now().timestamp_millis());
        let path = self.output_dir.join(file_name);
        let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write report {}", path.display()))?;

        tracing::debug!("Report written to {}", path.display());
        Ok(path)
    }

    pub fn recommendations(&self, results: &[SuiteResult]) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();
        recommendations.extend(self.slow_tests(results));
        recommendations.extend(capability(results));
        recommendations.extend(self.unstable_latency(results));
        recommendations.extend(connectivity(results));
        recommendations
    }

    fn slow_tests(&self, results: &[SuiteResult]) -> Option<Recommendation> {
        let limit = self.thresholds.slow_test_ms;
        let slow: Vec<Value> = results
            .iter()
            .flat_map(|suite| {
                suite
                    .tests
                    .iter()
                    .filter(move |t| t.duration_ms > limit)
                    .map(move |t| {
                        json!({"suite": suite.name, "test": t.name, "durationMs": t.duration_ms})
                    })
            })
            .collect();

        if slow.is_empty() {
            return None;
        }
        Some(Recommendation {
            category: RecommendationCategory::Performance,
            message: format!(
                "{} test(s) took longer than {}ms; consider optimizing these operations",
                slow.len(),
                limit
            ),
            details: json!({"thresholdMs": limit, "tests": slow}),
        })
    }

    fn unstable_latency(&self, results: &[SuiteResult]) -> Option<Recommendation> {
        let limit = self.thresholds.stability_variance;
        let unstable: Vec<Value> = results
            .iter()
            .filter_map(|suite| {
                let data = suite.test(STABILITY_SEQUENTIAL)?.data.as_ref()?;
                let variance = data.get("variance")?.as_f64()?;
                (variance > limit).then(|| json!({"suite": suite.name, "variance": variance}))
            })
            .collect();

        if unstable.is_empty() {
            return None;
        }
        Some(Recommendation {
            category: RecommendationCategory::Stability,
            message: format!(
                "Response time variance exceeded {} ms²; investigate inconsistent latency",
                limit
            ),
            details: json!({"thresholdMs2": limit, "suites": unstable}),
        })
    }
}

/// Sum of a discovery count across suites, `None` when no suite reported it
fn discovered(results: &[SuiteResult], test: &str) -> Option<u64> {
    results
        .iter()
        .filter_map(|suite| suite.test(test)?.data.as_ref()?.get("count")?.as_u64())
        .fold(None, |total, count| Some(total.unwrap_or(0) + count))
}

fn capability(results: &[SuiteResult]) -> Option<Recommendation> {
    let tools = discovered(results, DISCOVERY_TOOLS);
    let resources = discovered(results, DISCOVERY_RESOURCES);
    let prompts = discovered(results, DISCOVERY_PROMPTS);

    if tools.is_none() && resources.is_none() && prompts.is_none() {
        return None;
    }
    let (tools, resources, prompts) = (
        tools.unwrap_or(0),
        resources.unwrap_or(0),
        prompts.unwrap_or(0),
    );
    if tools + resources + prompts > 0 {
        return None;
    }
    Some(Recommendation {
        category: RecommendationCategory::Capability,
        message: "No tools, resources or prompts were discovered; the server exposes no capabilities"
            .to_string(),
        details: json!({"tools": tools, "resources": resources, "prompts": prompts}),
    })
}

fn connectivity(results: &[SuiteResult]) -> Option<Recommendation> {
    let failed: Vec<Value> = results
        .iter()
        .filter(|suite| suite.is_connection_failure())
        .map(|suite| {
            json!({
                "suite": suite.name,
                "transport": suite.transport,
                "error": suite.error.as_ref().map(|e| e.message.clone()),
            })
        })
        .collect();

    if failed.is_empty() {
        return None;
    }
    Some(Recommendation {
        category: RecommendationCategory::Connectivity,
        message: format!(
            "{} suite(s) could not connect; check that the server is running and the transport is correct",
            failed.len()
        ),
        details: json!({"suites": failed}),
    })
}
