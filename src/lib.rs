//! mcp-harness - Test harness for Model Context Protocol servers
//!
//! Drives MCP servers through a fixed sequence of test phases over any of the
//! three transports and reports the outcome.
//!
//! # Modules
//!
//! - `transport` - stdio, SSE and streamable HTTP transports
//! - `detect` - HTTP transport probing and handshake verification
//! - `client` - MCP client over a transport
//! - `runner` - connection management, test execution and suite phases
//! - `reporter` - JSON reports, recommendations and the console summary
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_harness::config::{HarnessConfig, TargetConfig};
//! use mcp_harness::runner::SuiteRunner;
//!
//! let config = HarnessConfig::default();
//! let runner = SuiteRunner::new(config);
//! let target = TargetConfig {
//!     transport: "stdio".into(),
//!     command: Some("node".into()),
//!     args: vec!["server.js".into()],
//!     ..TargetConfig::default()
//! };
//! let result = runner.run_target(&target).await;
//! println!("passed: {}", result.passed());
//! ```

pub mod client;
pub mod config;
pub mod detect;
pub mod errors;
pub mod protocol;
pub mod reporter;
pub mod runner;
pub mod transport;
pub mod ui;

// Re-export commonly used types
pub use config::{HarnessConfig, TargetConfig};
pub use detect::{detect_transport, DetectionResult};
pub use errors::{HarnessError, HarnessResult};
pub use reporter::{Report, ReportGenerator};
pub use runner::{SuiteResult, SuiteRunner};
