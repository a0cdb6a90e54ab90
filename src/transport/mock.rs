//! Mock transport for testing
//!
//! Provides a mock implementation of the Transport trait that can be used
//! for unit testing without spawning actual MCP server processes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::protocol::jsonrpc::JsonRpcError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};

use super::Transport;

/// Type alias for sent notifications storage to reduce type complexity
type SentNotifications = Arc<Mutex<Vec<(String, Option<Value>)>>>;

/// Canned reply for a method
#[derive(Debug, Clone)]
enum Reply {
    Result(Value),
    Error(JsonRpcError),
}

/// Mock transport for testing
///
/// Replies come from a one-shot queue first, then from per-method handlers
/// that answer every call. Clones share state, so a test can keep a handle
/// after giving the transport away.
#[derive(Clone, Default)]
pub struct MockTransport {
    /// Queue of responses to return for requests
    responses: Arc<Mutex<VecDeque<JsonRpcResponse>>>,
    /// Standing replies keyed by method
    handlers: Arc<Mutex<HashMap<String, Reply>>>,
    /// Requests sent through the transport
    sent_requests: Arc<Mutex<Vec<JsonRpcRequest>>>,
    /// Notifications sent through the transport
    sent_notifications: SentNotifications,
    connect_error: Arc<Mutex<Option<String>>>,
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    request_counter: Arc<AtomicU64>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to be returned by the next request
    pub async fn queue_response(&self, response: JsonRpcResponse) {
        self.responses.lock().await.push_back(response);
    }

    /// Answer every call to `method` with `result`
    pub async fn on(&self, method: &str, result: Value) {
        self.handlers
            .lock()
            .await
            .insert(method.to_string(), Reply::Result(result));
    }

    /// Answer every call to `method` with a JSON-RPC error
    pub async fn on_error(&self, method: &str, code: i32, message: &str) {
        self.handlers.lock().await.insert(
            method.to_string(),
            Reply::Error(JsonRpcError::new(code, message)),
        );
    }

    /// Make the next `connect` fail
    pub async fn fail_connect(&self, message: &str) {
        *self.connect_error.lock().await = Some(message.to_string());
    }

    /// Create a successful response with the given result
    pub fn success_response(id: RequestId, result: Value) -> JsonRpcResponse {
        JsonRpcResponse::success(id, result)
    }

    /// Create an error response
    pub fn error_response(id: RequestId, code: i32, message: &str) -> JsonRpcResponse {
        JsonRpcResponse::error(id, JsonRpcError::new(code, message))
    }

    /// Get all sent requests
    pub async fn sent_requests(&self) -> Vec<JsonRpcRequest> {
        self.sent_requests.lock().await.clone()
    }

    /// Methods of all sent requests, in order
    pub async fn sent_methods(&self) -> Vec<String> {
        self.sent_requests
            .lock()
            .await
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    /// Get all sent notifications as (method, params) tuples
    pub async fn sent_notifications(&self) -> Vec<(String, Option<Value>)> {
        self.sent_notifications.lock().await.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Check if transport has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        if let Some(message) = self.connect_error.lock().await.take() {
            anyhow::bail!(message);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        if self.is_closed() {
            anyhow::bail!("Transport closed");
        }

        let id = RequestId::Number(self.request_counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.sent_requests
            .lock()
            .await
            .push(JsonRpcRequest::new(id.clone(), method, params));

        if let Some(mut response) = self.responses.lock().await.pop_front() {
            response.id = id;
            return Ok(response);
        }

        let reply = self.handlers.lock().await.get(method).cloned();
        Ok(match reply {
            Some(Reply::Result(result)) => JsonRpcResponse::success(id, result),
            Some(Reply::Error(error)) => JsonRpcResponse::error(id, error),
            None => JsonRpcResponse::error(id, JsonRpcError::method_not_found(method)),
        })
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.sent_notifications
            .lock()
            .await
            .push((method.to_string(), params));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        "mock"
    }
}
