//! Mock client for testing
//!
//! Provides a [`ProtocolClient`] implementation for unit testing the runner
//! without spawning actual MCP server processes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::jsonrpc::JsonRpcError;
use crate::protocol::mcp::{InitializeResult, Prompt, Resource, Tool};
use crate::protocol::{Implementation, ServerCapabilities};

use super::ProtocolClient;

/// Reply for one tool
pub type ToolHandler = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Decides whether the n-th `list_tools` call (0-based) fails
pub type FailurePattern = Arc<dyn Fn(usize) -> bool + Send + Sync>;

/// Mock MCP client for testing
///
/// Tools, resources and prompts are configured up front with the builder
/// methods. Unknown tools and non-object arguments are rejected with a
/// JSON-RPC error. Resources and prompts can be marked unsupported, in which
/// case listing them returns method-not-found.
#[derive(Clone)]
pub struct MockClient {
    tools: Vec<Tool>,
    tool_handlers: HashMap<String, ToolHandler>,
    resources: Option<Vec<Resource>>,
    prompts: Option<Vec<Prompt>>,
    list_tools_failures: Option<FailurePattern>,
    accept_unknown_tools: bool,
    delay: Duration,
    connect_error: Option<String>,
    list_tools_calls: Arc<AtomicUsize>,
    tool_calls: Arc<Mutex<Vec<(String, Value)>>>,
    close_count: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            tool_handlers: HashMap::new(),
            resources: Some(Vec::new()),
            prompts: Some(Vec::new()),
            list_tools_failures: None,
            accept_unknown_tools: false,
            delay: Duration::ZERO,
            connect_error: None,
            list_tools_calls: Arc::new(AtomicUsize::new(0)),
            tool_calls: Arc::new(Mutex::new(Vec::new())),
            close_count: Arc::new(AtomicUsize::new(0)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a tool with a handler computing its raw `result`
    pub fn with_tool(
        mut self,
        name: &str,
        input_schema: Value,
        handler: impl Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.tools.push(Tool {
            name: name.to_string(),
            description: Some(format!("Mock tool {}", name)),
            input_schema,
        });
        self.tool_handlers
            .insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Register a tool that always answers with `text`
    pub fn with_text_tool(self, name: &str, text: &str) -> Self {
        let text = text.to_string();
        self.with_tool(name, json!({"type": "object"}), move |_| {
            Ok(json!({"content": [{"type": "text", "text": text}]}))
        })
    }

    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_prompts(mut self, prompts: Vec<Prompt>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Answer resources/list and prompts/list with method-not-found
    pub fn without_resources_or_prompts(mut self) -> Self {
        self.resources = None;
        self.prompts = None;
        self
    }

    /// Fail the `list_tools` calls selected by `pattern`
    pub fn failing_list_tools(
        mut self,
        pattern: impl Fn(usize) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.list_tools_failures = Some(Arc::new(pattern));
        self
    }

    /// Succeed calls to tools that do not exist
    pub fn accepting_unknown_tools(mut self) -> Self {
        self.accept_unknown_tools = true;
        self
    }

    /// Delay every operation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_connect(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    pub fn list_tools_calls(&self) -> usize {
        self.list_tools_calls.load(Ordering::SeqCst)
    }

    /// Recorded (tool, arguments) pairs
    pub fn tool_calls(&self) -> Vec<(String, Value)> {
        self.tool_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn connect(&self) -> Result<InitializeResult> {
        self.pause().await;
        if let Some(message) = &self.connect_error {
            anyhow::bail!("{}", message);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(InitializeResult {
            protocol_version: crate::protocol::mcp::LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation::new("mock-server", "0.0.0"),
            instructions: None,
        })
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let call = self.list_tools_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(pattern) = &self.list_tools_failures {
            if pattern(call) {
                anyhow::bail!("Injected list_tools failure (call {})", call);
            }
        }
        Ok(self.tools.clone())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.pause().await;
        match &self.resources {
            Some(resources) => Ok(resources.clone()),
            None => Err(JsonRpcError::method_not_found("resources/list").into()),
        }
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.pause().await;
        match &self.prompts {
            Some(prompts) => Ok(prompts.clone()),
            None => Err(JsonRpcError::method_not_found("prompts/list").into()),
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        if let Ok(mut calls) = self.tool_calls.lock() {
            calls.push((name.to_string(), arguments.clone()));
        }
        self.pause().await;

        if !arguments.is_object() {
            return Err(JsonRpcError::invalid_params("arguments must be an object").into());
        }

        match self.tool_handlers.get(name) {
            Some(handler) => handler(&arguments),
            None if self.accept_unknown_tools => {
                Ok(json!({"content": [{"type": "text", "text": "ok"}]}))
            }
            None => Err(JsonRpcError::invalid_params(format!("Unknown tool: {}", name)).into()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        "mock"
    }
}
