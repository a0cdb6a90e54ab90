//! Stdio transport for local MCP servers

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

use super::pending::PendingRequests;
use super::{Transport, TransportConfig};

/// Stdio transport for communicating with MCP servers via stdin/stdout
///
/// The server process is spawned on [`Transport::connect`]. A reader task
/// routes every response line to the request waiting for its id.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    config: TransportConfig,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: Arc<PendingRequests>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Describe a server process; nothing is spawned yet
    pub fn new(
        command: &str,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        config: TransportConfig,
    ) -> Self {
        Self {
            command: command.to_string(),
            args,
            env,
            config,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: PendingRequests::new(),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    async fn write_line(&self, message: &impl serde::Serialize) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        if line.len() > self.config.max_message_size {
            anyhow::bail!(
                "Message of {} bytes exceeds limit of {} bytes",
                line.len(),
                self.config.max_message_size
            );
        }
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().context("Stdio transport is not connected")?;
        stdin
            .write_all(line.as_bytes())
            .await
            .context("Failed to write to server stdin")?;
        stdin.flush().await.context("Failed to flush server stdin")?;
        Ok(())
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Route one line of server stdout
fn dispatch_line(pending: &PendingRequests, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match JsonRpcMessage::parse(line) {
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
        Err(_) => {
            tracing::debug!("Ignoring non-JSON-RPC stdout line: {}", line);
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<()> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn MCP server process '{}'", self.command))?;

        let stdout = child.stdout.take().context("No stdout available")?;
        let pending = Arc::clone(&self.pending);
        self.track(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_line(&pending, &line),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("Server stdout read failed: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("Server stdout closed");
            pending.fail_all();
        }));

        if let Some(stderr) = child.stderr.take() {
            self.track(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("server stderr: {}", line);
                }
            }));
        }

        *self.stdin.lock().await = child.stdin.take();
        tracing::debug!(
            "Spawned MCP server '{}' (pid {:?})",
            self.command,
            child.id()
        );
        *child_slot = Some(child);
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.pending.next_id();
        let slot = self.pending.register(id.clone());

        let request = JsonRpcRequest::new(id, method, params);
        self.write_line(&request).await?;

        slot.wait(self.config.timeout, method).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.write_line(&notification).await
    }

    async fn close(&self) -> Result<()> {
        // Dropping stdin signals EOF to well-behaved servers before the kill
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!("Server process already exited: {}", e);
            }
        }

        self.abort_tasks();
        self.pending.fail_all();
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        "stdio"
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_failure_reports_command() {
        let transport = StdioTransport::new(
            "/nonexistent/mcp-server-binary",
            vec![],
            BTreeMap::new(),
            TransportConfig::default(),
        );
        let err = transport.connect().await.unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/mcp-server-binary"));
    }

    #[tokio::test]
    async fn request_before_connect_fails() {
        let transport = StdioTransport::new(
            "unused",
            vec![],
            BTreeMap::new(),
            TransportConfig::default(),
        );
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
        assert_eq!(transport.pending.len(), 0);
    }

    #[tokio::test]
    async fn oversized_message_rejected() {
        let config = TransportConfig {
            timeout: Duration::from_secs(1),
            max_message_size: 16,
        };
        let transport = StdioTransport::new("unused", vec![], BTreeMap::new(), config);
        let err = transport
            .notify("notifications/initialized", Some(json!({"padding": "x".repeat(64)})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[tokio::test]
    async fn dispatch_routes_responses_and_ignores_noise() {
        let pending = PendingRequests::new();
        let id = pending.next_id();
        let slot = pending.register(id.clone());

        dispatch_line(&pending, "server starting up...");
        dispatch_line(&pending, r#"{"jsonrpc":"2.0","method":"notifications/message"}"#);
        dispatch_line(&pending, r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#);

        let response = slot.wait(Duration::from_secs(1), "tools/list").await.unwrap();
        assert_eq!(response.id, RequestId::Number(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn round_trip_through_cat() {
        // `cat` echoes the request line back; an echoed request is not a response,
        // so the call must time out rather than resolve.
        let config = TransportConfig {
            timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let transport = StdioTransport::new("cat", vec![], BTreeMap::new(), config);
        transport.connect().await.unwrap();
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        transport.close().await.unwrap();
    }
}
