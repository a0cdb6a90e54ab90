//! Transport layer for MCP server communication
//!
//! Three interchangeable bindings behind one [`Transport`] trait:
//! - `stdio` - local server spawned as a subprocess, newline-delimited JSON-RPC
//! - `sse` - legacy HTTP+SSE transport (MCP 2024-11-05): GET event stream, POST endpoint
//! - `streamable_http` - Streamable HTTP transport (MCP 2025-03-26)
//!
//! Transports are built unconnected by [`build_transport`] from a
//! [`TransportDescriptor`]; all I/O starts at [`Transport::connect`].

pub mod mock;
mod pending;
pub mod sse;
pub mod stdio;
pub mod streamable_http;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::errors::{HarnessError, HarnessResult};
use crate::protocol::JsonRpcResponse;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

/// Placeholder written in place of secret header, env and token values
pub const REDACTED: &str = "[REDACTED]";

/// MCP transport abstraction
///
/// Methods take `&self` so one connected transport can carry several
/// in-flight requests; responses are routed back by request id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the underlying channel (spawn, open stream). No protocol traffic.
    async fn connect(&self) -> Result<()>;

    /// Send a JSON-RPC request and wait for its response
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a notification (no response expected)
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Close the transport
    async fn close(&self) -> Result<()>;

    /// Get transport type name for logging/debugging
    fn transport_type(&self) -> &'static str;
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound for a single request/response exchange
    pub timeout: Duration,
    /// Maximum outgoing message size in bytes
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_message_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// The three transport families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// Local stdio transport (spawn child process)
    Stdio,
    /// Legacy SSE transport (MCP 2024-11-05 spec)
    Sse,
    /// Streamable HTTP transport (MCP 2025 spec)
    StreamableHttp,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Sse => "sse",
            TransportType::StreamableHttp => "streamable_http",
        }
    }

    pub fn is_http(&self) -> bool {
        !matches!(self, TransportType::Stdio)
    }

    /// The other HTTP-family transport; stdio has no counterpart
    pub fn http_alternative(&self) -> Option<TransportType> {
        match self {
            TransportType::Sse => Some(TransportType::StreamableHttp),
            TransportType::StreamableHttp => Some(TransportType::Sse),
            TransportType::Stdio => None,
        }
    }
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stdio" => Ok(TransportType::Stdio),
            "sse" | "sse_legacy" | "event-stream" | "event_stream" => Ok(TransportType::Sse),
            "http" | "streamable_http" | "streamable-http" | "streamablehttp" | "streamed-http" => {
                Ok(TransportType::StreamableHttp)
            }
            _ => Err(HarnessError::invalid_transport(s)),
        }
    }
}

/// Guess the HTTP transport family from the URL shape alone
///
/// - Path containing "/sse" → SSE
/// - Query containing "sse" → SSE
/// - Otherwise → StreamableHttp (MCP 2025 spec default)
pub fn url_transport_hint(url: &str) -> TransportType {
    let url_lower = url.to_lowercase();

    let (path, query) = match url_lower.find('?') {
        Some(idx) => (&url_lower[..idx], &url_lower[idx..]),
        None => (url_lower.as_str(), ""),
    };

    if path.contains("/sse") || query.contains("sse") {
        return TransportType::Sse;
    }

    TransportType::StreamableHttp
}

/// Connection parameters for exactly one transport family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportDescriptor {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
}

impl TransportDescriptor {
    pub fn stdio(
        command: impl Into<String>,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> HarnessResult<Self> {
        let descriptor = Self::Stdio {
            command: command.into(),
            args,
            env,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn sse(url: impl Into<String>, headers: BTreeMap<String, String>) -> HarnessResult<Self> {
        let descriptor = Self::Sse {
            url: url.into(),
            headers,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn streamable_http(
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
        auth_token: Option<String>,
    ) -> HarnessResult<Self> {
        let descriptor = Self::StreamableHttp {
            url: url.into(),
            headers,
            auth_token,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Build a descriptor for an HTTP-family transport
    pub fn http(
        transport: TransportType,
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
        auth_token: Option<String>,
    ) -> HarnessResult<Self> {
        match transport {
            TransportType::Sse => {
                let mut headers = headers;
                if let Some(token) = auth_token {
                    headers.insert("Authorization".to_string(), format!("Bearer {}", token));
                }
                Self::sse(url, headers)
            }
            TransportType::StreamableHttp => Self::streamable_http(url, headers, auth_token),
            TransportType::Stdio => Err(HarnessError::invalid_config(
                "stdio is not an HTTP transport",
            )),
        }
    }

    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::Stdio { .. } => TransportType::Stdio,
            Self::Sse { .. } => TransportType::Sse,
            Self::StreamableHttp { .. } => TransportType::StreamableHttp,
        }
    }

    /// Reject descriptors missing required fields. Performs no I/O.
    pub fn validate(&self) -> HarnessResult<()> {
        match self {
            Self::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(HarnessError::invalid_config(
                        "stdio transport requires a command",
                    ));
                }
                Ok(())
            }
            Self::Sse { url, .. } | Self::StreamableHttp { url, .. } => {
                validate_url(self.transport_type(), url).map(|_| ())
            }
        }
    }

    /// JSON rendering with secrets replaced; the only form that is logged or serialized
    pub fn sanitized(&self) -> Value {
        match self {
            Self::Stdio { command, args, env } => json!({
                "type": "stdio",
                "command": command,
                "args": args,
                "env": redact_map(env),
            }),
            Self::Sse { url, headers } => json!({
                "type": "sse",
                "url": url,
                "headers": redact_map(headers),
            }),
            Self::StreamableHttp {
                url,
                headers,
                auth_token,
            } => json!({
                "type": "streamable_http",
                "url": url,
                "headers": redact_map(headers),
                "authToken": auth_token.as_ref().map(|_| REDACTED),
            }),
        }
    }

    /// Short human-readable target (command line or URL)
    pub fn target(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            Self::Stdio { command, args, .. } => format!("{} {}", command, args.join(" ")),
            Self::Sse { url, .. } | Self::StreamableHttp { url, .. } => url.clone(),
        }
    }
}

/// Whether a header or env key names a secret
pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_lowercase();
    ["auth", "token", "key"].iter().any(|s| key.contains(s))
}

fn redact_map(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| {
            let value = if is_secret_key(k) {
                REDACTED.to_string()
            } else {
                v.clone()
            };
            (k.clone(), value)
        })
        .collect()
}

fn validate_url(transport: TransportType, url: &str) -> HarnessResult<Url> {
    if url.trim().is_empty() {
        return Err(HarnessError::invalid_config(format!(
            "{} transport requires a url",
            transport
        )));
    }
    let parsed = Url::parse(url).map_err(|e| {
        HarnessError::invalid_config(format!("invalid {} url '{}': {}", transport, url, e))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(HarnessError::invalid_config(format!(
            "{} url must use http or https, got '{}'",
            transport,
            parsed.scheme()
        )));
    }
    Ok(parsed)
}

/// Construct an unconnected transport for a descriptor
///
/// Fails with `InvalidConfig` when required fields are missing. No network
/// or process I/O happens here.
pub fn build_transport(
    descriptor: &TransportDescriptor,
    config: &TransportConfig,
) -> HarnessResult<Arc<dyn Transport>> {
    descriptor.validate()?;

    let transport: Arc<dyn Transport> = match descriptor {
        TransportDescriptor::Stdio { command, args, env } => Arc::new(StdioTransport::new(
            command,
            args.clone(),
            env.clone(),
            config.clone(),
        )),
        TransportDescriptor::Sse { url, headers } => Arc::new(
            SseTransport::new(url, headers, config.clone())
                .map_err(|e| HarnessError::invalid_config(format!("{:#}", e)))?,
        ),
        TransportDescriptor::StreamableHttp {
            url,
            headers,
            auth_token,
        } => Arc::new(
            StreamableHttpTransport::new(url, headers, auth_token.as_deref(), config.clone())
                .map_err(|e| HarnessError::invalid_config(format!("{:#}", e)))?,
        ),
    };

    Ok(transport)
}

/// Turn a string header map into a reqwest header map
pub(crate) fn header_map(headers: &BTreeMap<String, String>) -> Result<reqwest::header::HeaderMap> {
    use anyhow::Context;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name '{}'", name))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("Invalid value for header '{}'", name))?;
        map.insert(name, value);
    }
    Ok(map)
}
