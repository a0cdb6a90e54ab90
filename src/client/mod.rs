//! MCP Client - the protocol operations the harness drives
//!
//! Provides:
//! - [`ProtocolClient`], the seam between the harness and a server
//! - [`McpClient`], the implementation over any [`Transport`]
//! - [`mock::MockClient`] for exercising the runner without a server

pub mod mock;

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::protocol::jsonrpc::JsonRpcError;
use crate::protocol::mcp::{
    self, CallToolParams, InitializeParams, InitializeResult, ListPromptsResult,
    ListResourcesResult, ListToolsResult, Prompt, Resource, Tool,
};
use crate::protocol::Implementation;
use crate::transport::Transport;

/// Name this harness reports in `clientInfo`
pub const CLIENT_NAME: &str = "mcp-harness";

/// Operations the harness needs from a connected server
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the transport and perform the initialize handshake
    async fn connect(&self) -> Result<InitializeResult>;

    async fn list_tools(&self) -> Result<Vec<Tool>>;

    async fn list_resources(&self) -> Result<Vec<Resource>>;

    async fn list_prompts(&self) -> Result<Vec<Prompt>>;

    /// Call a tool, returning the raw `result` object so callers can check
    /// its shape themselves
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;

    async fn close(&self) -> Result<()>;

    fn transport_type(&self) -> &'static str;
}

/// True when the error is a JSON-RPC "method not found" reply
pub fn is_method_not_found(error: &anyhow::Error) -> bool {
    if error
        .chain()
        .filter_map(|e| e.downcast_ref::<JsonRpcError>())
        .any(JsonRpcError::is_method_not_found)
    {
        return true;
    }
    format!("{:#}", error)
        .to_lowercase()
        .contains("method not found")
}

/// MCP Client for communicating with MCP servers
pub struct McpClient {
    transport: Arc<dyn Transport>,
    client_info: Implementation,
    server: RwLock<Option<InitializeResult>>,
}

impl McpClient {
    /// Create a new MCP client with the given transport
    pub fn new(transport: Arc<dyn Transport>, client_info: Implementation) -> Self {
        Self {
            transport,
            client_info,
            server: RwLock::new(None),
        }
    }

    /// Client identifying itself as this harness
    pub fn for_harness(transport: Arc<dyn Transport>) -> Self {
        Self::new(
            transport,
            Implementation::new(CLIENT_NAME, env!("CARGO_PKG_VERSION")),
        )
    }

    /// Server info (name, version) after initialization
    pub fn server_info(&self) -> Option<Implementation> {
        self.server
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|r| r.server_info.clone()))
    }

    async fn request_raw(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let response = self.transport.request(method, params).await?;
        response
            .into_result()
            .with_context(|| format!("{} failed", method))
    }

    async fn request<R: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<R> {
        let result = self.request_raw(method, params).await?;
        serde_json::from_value(result)
            .with_context(|| format!("Failed to deserialize {} response", method))
    }
}

#[async_trait]
impl ProtocolClient for McpClient {
    async fn connect(&self) -> Result<InitializeResult> {
        self.transport.connect().await?;

        let params = serde_json::to_value(InitializeParams::new(self.client_info.clone()))
            .context("Failed to serialize initialize params")?;
        let result: InitializeResult = self.request(mcp::methods::INITIALIZE, Some(params)).await?;

        if result.protocol_version != mcp::PROTOCOL_VERSION_2024_11_05
            && result.protocol_version != mcp::PROTOCOL_VERSION_2025_03_26
        {
            tracing::warn!(
                "Server negotiated unrecognized protocol version {}",
                result.protocol_version
            );
        }
        tracing::debug!(
            "Initialized {} {} over {}",
            result.server_info.name,
            result.server_info.version,
            self.transport.transport_type()
        );

        self.transport
            .notify(mcp::methods::INITIALIZED, None)
            .await
            .context("Failed to send initialized notification")?;

        if let Ok(mut server) = self.server.write() {
            *server = Some(result.clone());
        }
        Ok(result)
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result: ListToolsResult = self.request(mcp::methods::TOOLS_LIST, None).await?;
        Ok(result.tools)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        let result: ListResourcesResult = self.request(mcp::methods::RESOURCES_LIST, None).await?;
        Ok(result.resources)
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let result: ListPromptsResult = self.request(mcp::methods::PROMPTS_LIST, None).await?;
        Ok(result.prompts)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.request_raw(mcp::methods::TOOLS_CALL, Some(params)).await
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut server) = self.server.write() {
            server.take();
        }
        self.transport.close().await
    }

    fn transport_type(&self) -> &'static str {
        self.transport.transport_type()
    }
}
