//! Single-request transport probe

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::Instant;

use crate::transport::{header_map, TransportType};

use super::DetectionResult;

/// Connect and overall timeout for the probe request
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Body bytes inspected at most
pub const PROBE_BODY_LIMIT: usize = 1024;

const TRANSPORT_HEADERS: [&str; 2] = ["mcp-transport", "x-mcp-transport"];
const SESSION_HEADER: &str = "mcp-session-id";

/// Sends one GET and classifies the reply. Never fails.
#[derive(Debug, Clone)]
pub struct TransportProber {
    timeout: Duration,
}

impl Default for TransportProber {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportProber {
    pub fn new() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn probe(&self, url: &str, headers: &BTreeMap<String, String>) -> DetectionResult {
        match self.fetch(url, headers).await {
            Ok((status, headers, body)) => classify(status, &headers, &body),
            Err(e) => DetectionResult::unknown(format!("probe failed: {:#}", e)),
        }
    }

    async fn fetch(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> anyhow::Result<(StatusCode, HeaderMap, String)> {
        let deadline = Instant::now() + self.timeout;

        let client = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .connect_timeout(self.timeout)
            .build()?;

        let request = client
            .get(url)
            .header(ACCEPT, "application/json, text/event-stream")
            .send();
        let response = tokio::time::timeout_at(deadline, request)
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {}ms", self.timeout.as_millis()))??;

        let status = response.status();
        let response_headers = response.headers().clone();
        let streaming = header_str(&response_headers, CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.contains("event-stream"));

        // An event stream never ends, so only its first chunk is inspected
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while body.len() < PROBE_BODY_LIMIT {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    body.extend_from_slice(&chunk);
                    if streaming && !body.is_empty() {
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::debug!("Probe body read stopped: {}", e);
                    break;
                }
                Ok(None) | Err(_) => break,
            }
        }
        body.truncate(PROBE_BODY_LIMIT);

        Ok((
            status,
            response_headers,
            String::from_utf8_lossy(&body).into_owned(),
        ))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Classify a probe reply. Rules are checked in order; the first match wins.
pub fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> DetectionResult {
    for name in TRANSPORT_HEADERS {
        if let Some(value) = header_str(headers, name) {
            if let Ok(transport) = TransportType::from_str(value) {
                return DetectionResult::detected(
                    transport,
                    100,
                    format!("server declared transport via {} header", name),
                );
            }
        }
    }

    let body_lower = body.to_lowercase();
    let content_type = header_str(headers, CONTENT_TYPE.as_str())
        .unwrap_or_default()
        .to_lowercase();
    let mentions_event_stream = body_lower.contains("event-stream");
    let event_stream = content_type.contains("event-stream") || mentions_event_stream;

    if event_stream && status == StatusCode::NOT_ACCEPTABLE {
        return DetectionResult::detected(
            TransportType::StreamableHttp,
            90,
            "406 Not Acceptable mentioning event-stream: server wants POST with both accept types",
        );
    }

    if event_stream && status.is_success() {
        return DetectionResult::detected(
            TransportType::Sse,
            70,
            format!("GET answered {} with an event stream", status.as_u16()),
        );
    }

    if mentions_event_stream && is_json_error(body) {
        return DetectionResult::detected(
            TransportType::StreamableHttp,
            85,
            format!(
                "JSON error body ({}) mentions event-stream",
                status.as_u16()
            ),
        );
    }

    if headers.contains_key(SESSION_HEADER) {
        return DetectionResult::detected(
            TransportType::StreamableHttp,
            80,
            "response carries an mcp-session-id header",
        );
    }

    DetectionResult::detected(
        TransportType::StreamableHttp,
        30,
        format!(
            "low-confidence default guess, not a detection: HTTP {} gave no transport signal",
            status.as_u16()
        ),
    )
}

fn is_json_error(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .map(|v| v.get("error").is_some())
        .unwrap_or(false)
}
