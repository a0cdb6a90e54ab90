//! Protocol layer for MCP communication
//!
//! - JSON-RPC 2.0 envelopes and error codes
//! - The subset of MCP message types the harness exercises

pub mod jsonrpc;
pub mod mcp;

pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
pub use mcp::{ClientCapabilities, Implementation, ServerCapabilities};
