//! SSE (Server-Sent Events) transport for remote MCP servers
//!
//! The client holds a long-lived GET stream open. The server announces a POST
//! endpoint with an `endpoint` event, and replies to POSTed requests arrive
//! on the stream as `message` events.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use url::Url;

use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

use super::pending::PendingRequests;
use super::{header_map, Transport, TransportConfig};

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default `message` type
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental `text/event-stream` decoder
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            self.process_line(&line);
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

/// SSE transport for communicating with remote MCP servers
pub struct SseTransport {
    base_url: Url,
    client: reqwest::Client,
    config: TransportConfig,
    endpoint: RwLock<Option<Url>>,
    pending: Arc<PendingRequests>,
    stream_task: StdMutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Create a new SSE transport; the stream is opened on connect
    pub fn new(
        base_url: &str,
        headers: &BTreeMap<String, String>,
        config: TransportConfig,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid SSE URL")?;

        // No overall timeout: the event stream stays open for the whole session
        let client = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .connect_timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            client,
            config,
            endpoint: RwLock::new(None),
            pending: PendingRequests::new(),
            stream_task: StdMutex::new(None),
        })
    }

    /// POST endpoint announced by the server, once connected
    pub async fn endpoint(&self) -> Option<Url> {
        self.endpoint.read().await.clone()
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<reqwest::Response> {
        let endpoint = self
            .endpoint
            .read()
            .await
            .clone()
            .context("SSE transport is not connected")?;

        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.config.timeout)
            .json(body)
            .send()
            .await
            .context("Failed to POST to SSE endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("HTTP error {}: {}", status, body);
        }
        Ok(response)
    }

    fn abort_stream(&self) {
        if let Ok(mut task) = self.stream_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

/// Handle one event from the stream. Returns the endpoint when announced.
fn handle_event(base: &Url, pending: &PendingRequests, event: SseEvent) -> Option<Url> {
    match event.event_type() {
        "endpoint" => match base.join(event.data.trim()) {
            Ok(url) => return Some(url),
            Err(e) => tracing::warn!("Server announced invalid endpoint '{}': {}", event.data, e),
        },
        "message" => match JsonRpcMessage::parse(&event.data) {
            Ok(JsonRpcMessage::Response(response)) => {
                let id = response.id.clone();
                if !pending.complete(response) {
                    tracing::debug!("Discarding response for request {} (no longer awaited)", id);
                }
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                tracing::debug!("Server notification: {}", notification.method);
            }
            Ok(JsonRpcMessage::Request(request)) => {
                tracing::debug!("Ignoring server-initiated request: {}", request.method);
            }
            Err(e) => tracing::debug!("Unparseable SSE message: {}", e),
        },
        other => tracing::debug!("Ignoring SSE event type '{}'", other),
    }
    None
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self) -> Result<()> {
        if self.endpoint.read().await.is_some() {
            return Ok(());
        }

        let open = self
            .client
            .get(self.base_url.clone())
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = match tokio::time::timeout(self.config.timeout, open).await {
            Ok(response) => response.context("Failed to open SSE stream")?,
            Err(_) => anyhow::bail!(
                "SSE stream did not respond within {}ms",
                self.config.timeout.as_millis()
            ),
        };

        if !response.status().is_success() {
            anyhow::bail!("SSE stream rejected with HTTP {}", response.status());
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let base = self.base_url.clone();
        let pending = Arc::clone(&self.pending);

        let task = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut parser = SseParser::new();
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::debug!("SSE stream error: {}", e);
                        break;
                    }
                };
                for event in parser.feed(&chunk) {
                    if let Some(url) = handle_event(&base, &pending, event) {
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(url);
                        }
                    }
                }
            }
            tracing::debug!("SSE stream closed");
            pending.fail_all();
        });
        self.abort_stream();
        if let Ok(mut slot) = self.stream_task.lock() {
            *slot = Some(task);
        }

        let endpoint = match tokio::time::timeout(self.config.timeout, endpoint_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) => {
                self.abort_stream();
                anyhow::bail!("SSE stream closed before an endpoint event was received");
            }
            Err(_) => {
                self.abort_stream();
                anyhow::bail!(
                    "No endpoint event received within {}ms",
                    self.config.timeout.as_millis()
                );
            }
        };

        tracing::debug!("SSE endpoint: {}", endpoint);
        *self.endpoint.write().await = Some(endpoint);
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.pending.next_id();
        let slot = self.pending.register(id.clone());

        let request = JsonRpcRequest::new(id, method, params);
        let response = self.post(&request).await?;

        // Some servers answer inline instead of on the stream
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            if let Ok(text) = response.text().await {
                if let Ok(JsonRpcMessage::Response(inline)) = JsonRpcMessage::parse(&text) {
                    self.pending.complete(inline);
                }
            }
        }

        slot.wait(self.config.timeout, method).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.post(&notification).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.abort_stream();
        self.endpoint.write().await.take();
        self.pending.fail_all();
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        "sse"
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.abort_stream();
    }
}

/// Read an SSE body until a response with the wanted id appears
pub(crate) async fn read_sse_response(
    response: reqwest::Response,
    wanted: &crate::protocol::RequestId,
) -> Result<JsonRpcResponse> {
    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();

    let matches = |event: &SseEvent| -> Option<JsonRpcResponse> {
        match JsonRpcMessage::parse(&event.data) {
            Ok(JsonRpcMessage::Response(r)) if &r.id == wanted => Some(r),
            Ok(JsonRpcMessage::Notification(n)) => {
                tracing::debug!("Received notification in SSE stream: {}", n.method);
                None
            }
            _ => None,
        }
    };

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read SSE body")?;
        for event in parser.feed(&chunk) {
            if let Some(response) = matches(&event) {
                return Ok(response);
            }
        }
    }
    if let Some(response) = parser.finish().as_ref().and_then(matches) {
        return Ok(response);
    }

    anyhow::bail!("No JSON-RPC response for request {} found in SSE stream", wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use std::time::Duration;

    #[test]
    fn parser_splits_events_on_blank_lines() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: endpoint\ndata: /messages?session=1\n\ndata: {}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "endpoint");
        assert_eq!(events[0].data, "/messages?session=1");
        assert_eq!(events[1].event_type(), "message");
    }

    #[test]
    fn parser_handles_chunk_boundaries_and_crlf() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"a\":").is_empty());
        assert!(parser.feed(b"1}\r\n").is_empty());
        let events = parser.feed(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn parser_keeps_split_utf8_intact() {
        let text = "data: héllo\n\n".as_bytes();
        let split = text.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let mut parser = SseParser::new();
        assert!(parser.feed(&text[..split]).is_empty());
        let events = parser.feed(&text[split..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn parser_joins_multiline_data_and_skips_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keepalive\ndata: one\ndata: two\n\n");
        assert_eq!(events, vec![SseEvent { event: None, data: "one\ntwo".into() }]);
    }

    #[test]
    fn parser_finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: tail").is_empty());
        assert_eq!(parser.finish().unwrap().data, "tail");
        assert!(parser.finish().is_none());
    }

    #[test]
    fn endpoint_event_resolves_relative_path() {
        let base = Url::parse("http://localhost:3000/sse").unwrap();
        let pending = PendingRequests::new();
        let url = handle_event(
            &base,
            &pending,
            SseEvent { event: Some("endpoint".into()), data: "/messages?sessionId=abc".into() },
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/messages?sessionId=abc");
    }

    #[tokio::test]
    async fn message_event_completes_pending_request() {
        let base = Url::parse("http://localhost:3000/sse").unwrap();
        let pending = PendingRequests::new();
        let id = pending.next_id();
        let slot = pending.register(id);

        let announced = handle_event(
            &base,
            &pending,
            SseEvent { event: None, data: r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.into() },
        );
        assert!(announced.is_none());

        let response = slot.wait(Duration::from_secs(1), "ping").await.unwrap();
        assert_eq!(response.id, RequestId::Number(1));
    }

    #[tokio::test]
    async fn request_before_connect_fails() {
        let transport =
            SseTransport::new("http://localhost:1/sse", &BTreeMap::new(), TransportConfig::default())
                .unwrap();
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
        assert!(transport.endpoint().await.is_none());
    }

    #[tokio::test]
    async fn silent_server_times_out_on_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept and hold sockets without ever answering
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = TransportConfig {
            timeout: Duration::from_millis(200),
            ..TransportConfig::default()
        };
        let transport =
            SseTransport::new(&format!("http://{}/sse", addr), &BTreeMap::new(), config).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), transport.connect())
            .await
            .expect("connect must give up on its own");
        let err = outcome.unwrap_err();
        assert!(err.to_string().contains("did not respond"), "{}", err);
        assert!(transport.endpoint().await.is_none());
        holder.abort();
    }

    #[test]
    fn invalid_url_fails() {
        assert!(SseTransport::new("not a url", &BTreeMap::new(), TransportConfig::default()).is_err());
    }
}
