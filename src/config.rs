//! Harness configuration
//!
//! Loaded from TOML. Looks for config in:
//! 1. The path given on the command line
//! 2. `.mcp-harness.toml` in the current directory
//! 3. `mcp-harness.toml` in the current directory
//! 4. `<config dir>/mcp-harness/config.toml`
//!
//! Every section is optional; missing values take the defaults below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{HarnessError, HarnessResult};
use crate::transport::{TransportDescriptor, TransportType};

/// Transport tag requesting auto-detection
pub const AUTO_TRANSPORT: &str = "auto";

/// Complete harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub harness: HarnessSettings,
    pub retry: RetrySettings,
    pub phases: PhaseSettings,
    pub thresholds: Thresholds,
    pub stability: StabilitySettings,
    pub performance: PerformanceSettings,
    pub targets: Vec<TargetConfig>,
    pub tools: Vec<ToolTestConfig>,
}

/// `[harness]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// Per-test timeout
    pub timeout_ms: u64,
    pub verbose: bool,
    pub output_dir: PathBuf,
    pub validate_schemas: bool,
    pub suite_name: Option<String>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            verbose: false,
            output_dir: PathBuf::from("test-reports"),
            validate_schemas: true,
            suite_name: None,
        }
    }
}

/// `[retry]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 1000,
        }
    }
}

/// `[phases]`: which phases run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSettings {
    pub discovery: bool,
    pub stability: bool,
    pub compliance: bool,
    pub performance: bool,
    pub error_handling: bool,
    pub custom: bool,
    pub tool_tests: bool,
    pub transport_specific: bool,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            discovery: true,
            stability: true,
            compliance: true,
            performance: true,
            error_handling: true,
            custom: true,
            tool_tests: true,
            transport_specific: true,
        }
    }
}

/// `[thresholds]`: limits that produce warnings or recommendations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub discovery_ms: u64,
    pub tool_call_ms: u64,
    pub slow_test_ms: u64,
    /// Sequential latency variance, in ms²
    pub stability_variance: f64,
    pub memory_growth_mb: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            discovery_ms: 1000,
            tool_call_ms: 5000,
            slow_test_ms: 1000,
            stability_variance: 100.0,
            memory_growth_mb: 50.0,
        }
    }
}

/// `[stability]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilitySettings {
    pub sequential_calls: usize,
    pub concurrent_calls: usize,
    pub memory_check: bool,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            sequential_calls: 20,
            concurrent_calls: 10,
            memory_check: false,
        }
    }
}

/// `[performance]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub iterations: usize,
    pub concurrent: usize,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            iterations: 10,
            concurrent: 5,
        }
    }
}

/// Untyped target as written in config or on the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub name: Option<String>,
    /// Transport tag, or `auto`
    pub transport: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub auth_token: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: None,
            transport: AUTO_TRANSPORT.to_string(),
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            url: None,
            headers: BTreeMap::new(),
            auth_token: None,
        }
    }
}

impl TargetConfig {
    pub fn is_auto(&self) -> bool {
        self.transport.trim().eq_ignore_ascii_case(AUTO_TRANSPORT)
    }

    /// Same target with a concrete transport
    pub fn with_transport(&self, transport: TransportType) -> Self {
        Self {
            transport: transport.as_str().to_string(),
            ..self.clone()
        }
    }

    /// Name for logs and suite titles
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.url
            .clone()
            .or_else(|| self.command.clone())
            .unwrap_or_else(|| "unnamed target".to_string())
    }

    /// Convert to a typed descriptor. `auto` targets must be resolved first.
    pub fn to_descriptor(&self) -> HarnessResult<TransportDescriptor> {
        if self.is_auto() {
            return Err(HarnessError::invalid_config(
                "transport 'auto' must be resolved by detection before connecting",
            ));
        }

        match TransportType::from_str(&self.transport)? {
            TransportType::Stdio => {
                let command = self.command.clone().ok_or_else(|| {
                    HarnessError::invalid_config("stdio transport requires a command")
                })?;
                TransportDescriptor::stdio(command, self.args.clone(), self.env.clone())
            }
            transport => {
                let url = self.url.clone().ok_or_else(|| {
                    HarnessError::invalid_config(format!("{} transport requires a url", transport))
                })?;
                TransportDescriptor::http(
                    transport,
                    url,
                    self.headers.clone(),
                    self.auth_token.clone(),
                )
            }
        }
    }
}

/// One `[[tools]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTestConfig {
    pub tool: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
    #[serde(default)]
    pub expect_text: Option<String>,
    #[serde(default = "default_true")]
    pub expect_success: bool,
    #[serde(default)]
    pub min_content_items: Option<usize>,
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn default_true() -> bool {
    true
}

impl HarnessConfig {
    /// Load config from a file, falling back to defaults when none exists
    ///
    /// An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> HarnessResult<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(HarnessError::invalid_config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Self::load_from_path(path);
        }

        for candidate in Self::default_paths() {
            if candidate.exists() {
                tracing::debug!("Using config file {}", candidate.display());
                return Self::load_from_path(&candidate);
            }
        }

        Ok(Self::default())
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(".mcp-harness.toml"),
            PathBuf::from("mcp-harness.toml"),
        ];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("mcp-harness").join("config.toml"));
        }
        paths
    }

    fn load_from_path(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::invalid_config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse_toml(&content)
    }

    /// Parse and validate TOML content
    pub fn parse_toml(content: &str) -> HarnessResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HarnessError::invalid_config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.retry.attempts == 0 {
            return Err(HarnessError::invalid_config("retry.attempts must be at least 1"));
        }
        if self.harness.timeout_ms == 0 {
            return Err(HarnessError::invalid_config(
                "harness.timeout_ms must be greater than 0",
            ));
        }
        for tool in &self.tools {
            if tool.tool.trim().is_empty() {
                return Err(HarnessError::invalid_config("[[tools]] entry with empty tool name"));
            }
        }
        Ok(())
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.harness.timeout_ms)
    }
}
