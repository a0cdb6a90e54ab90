//! Streamable HTTP transport for remote MCP servers
//!
//! Every message is a POST to one endpoint. Replies come back either as a
//! JSON body or as an SSE-framed body carrying the response. The server may
//! assign an `Mcp-Session-Id` which is echoed on every subsequent request.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

use super::sse::read_sse_response;
use super::{header_map, Transport, TransportConfig};

/// HTTP header for MCP session ID
pub const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// Streamable HTTP transport for remote MCP servers
#[derive(Debug)]
pub struct StreamableHttpTransport {
    endpoint: Url,
    client: reqwest::Client,
    auth_token: Option<String>,
    session_id: RwLock<Option<String>>,
    config: TransportConfig,
    request_id: AtomicU64,
}

impl StreamableHttpTransport {
    /// Create a new Streamable HTTP transport
    pub fn new(
        endpoint: &str,
        headers: &BTreeMap<String, String>,
        auth_token: Option<&str>,
        config: TransportConfig,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("Invalid endpoint URL")?;

        let client = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .timeout(config.timeout)
            .use_rustls_tls()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint,
            client,
            auth_token: auth_token.map(str::to_string),
            session_id: RwLock::new(None),
            config,
            request_id: AtomicU64::new(0),
        })
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Get current session ID if established
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().ok().and_then(|s| s.clone())
    }

    fn set_session_id(&self, value: Option<String>) {
        if let Ok(mut slot) = self.session_id.write() {
            *slot = value;
        }
    }

    /// Build request with required headers
    fn build_request(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(session_id) = self.session_id() {
            builder = builder.header(MCP_SESSION_ID_HEADER, session_id);
        }

        builder
    }

    /// Capture a session ID from response headers
    fn extract_session_id(&self, headers: &HeaderMap) {
        if let Some(id) = headers
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id().as_deref() != Some(id) {
                tracing::debug!("Established session: {}", id);
                self.set_session_id(Some(id.to_string()));
            }
        }
    }

    async fn send(&self, body: &impl serde::Serialize) -> Result<reqwest::Response> {
        let response = self
            .build_request()
            .json(body)
            .send()
            .await
            .context("Failed to send message")?;

        if response.status() == StatusCode::NOT_FOUND && self.session_id().is_some() {
            self.set_session_id(None);
            anyhow::bail!("Session expired (404), re-initialization required");
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("HTTP error {}: {}", status, body);
        }

        self.extract_session_id(response.headers());
        Ok(response)
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn connect(&self) -> Result<()> {
        // Session state is negotiated by the initialize request itself
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id();
        let request = JsonRpcRequest::new(id.clone(), method, params);

        let exchange = async {
            let response = self.send(&request).await?;
            if is_event_stream(response.headers()) {
                read_sse_response(response, &id).await
            } else {
                let body = response.text().await.context("Failed to read response body")?;
                if body.len() > self.config.max_message_size {
                    anyhow::bail!(
                        "Response of {} bytes exceeds limit of {} bytes",
                        body.len(),
                        self.config.max_message_size
                    );
                }
                serde_json::from_str::<JsonRpcResponse>(&body)
                    .context("Failed to parse JSON response")
            }
        };

        match tokio::time::timeout(self.config.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!(
                "Request '{}' (id {}) timed out after {}ms",
                method,
                id,
                self.config.timeout.as_millis()
            ),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.send(&notification).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(session_id) = self.session_id() {
            let mut builder = self
                .client
                .delete(self.endpoint.clone())
                .header(MCP_SESSION_ID_HEADER, &session_id);
            if let Some(token) = &self.auth_token {
                builder = builder.bearer_auth(token);
            }

            match builder.send().await {
                Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                    tracing::debug!("Server does not support session termination");
                }
                Ok(response) if response.status().is_success() => {
                    tracing::debug!("Session {} terminated", session_id);
                }
                Ok(response) => {
                    tracing::debug!("Session termination returned HTTP {}", response.status());
                }
                Err(e) => {
                    tracing::warn!("Failed to terminate session: {}", e);
                }
            }
        }

        self.set_session_id(None);
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        "streamable_http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn transport(url: &str) -> Result<StreamableHttpTransport> {
        StreamableHttpTransport::new(url, &BTreeMap::new(), None, TransportConfig::default())
    }

    #[test]
    fn parse_endpoint_url() {
        let transport = transport("https://example.com:8080/mcp?key=value").unwrap();
        assert_eq!(
            transport.endpoint.as_str(),
            "https://example.com:8080/mcp?key=value"
        );
    }

    #[test]
    fn invalid_url_fails() {
        assert!(transport("not a url").is_err());
        assert!(transport("").is_err());
        assert!(transport("example.com/mcp").is_err());
    }

    #[test]
    fn invalid_header_fails() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        let result =
            StreamableHttpTransport::new("http://localhost/mcp", &headers, None, TransportConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn request_id_sequential() {
        let transport = transport("https://example.com/mcp").unwrap();
        assert_eq!(transport.next_id(), RequestId::Number(1));
        assert_eq!(transport.next_id(), RequestId::Number(2));
    }

    #[test]
    fn session_id_captured_from_headers() {
        let transport = transport("https://example.com/mcp").unwrap();
        assert!(transport.session_id().is_none());

        let mut headers = HeaderMap::new();
        headers.insert(MCP_SESSION_ID_HEADER, HeaderValue::from_static("session-123"));
        transport.extract_session_id(&headers);
        assert_eq!(transport.session_id().as_deref(), Some("session-123"));

        transport.extract_session_id(&HeaderMap::new());
        assert_eq!(transport.session_id().as_deref(), Some("session-123"));
    }

    #[test]
    fn build_request_carries_session_and_token() {
        let transport = StreamableHttpTransport::new(
            "https://example.com/mcp",
            &BTreeMap::new(),
            Some("secret"),
            TransportConfig::default(),
        )
        .unwrap();
        transport.set_session_id(Some("abc".into()));

        let request = transport.build_request().build().unwrap();
        let headers = request.headers();
        assert_eq!(headers.get(MCP_SESSION_ID_HEADER).unwrap(), "abc");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer secret");
        assert_eq!(
            headers.get(ACCEPT).unwrap(),
            "application/json, text/event-stream"
        );
    }

    #[test]
    fn event_stream_content_type_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_event_stream(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream; charset=utf-8"));
        assert!(is_event_stream(&headers));
    }

    #[tokio::test]
    async fn close_without_session_is_noop() {
        let transport = transport("http://127.0.0.1:1/mcp").unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.transport_type(), "streamable_http");
    }
}
