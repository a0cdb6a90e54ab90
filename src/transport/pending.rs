//! Routing of responses to in-flight requests by id

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::oneshot;

use crate::protocol::{JsonRpcResponse, RequestId};

type Waiters = HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>;

/// Requests awaiting a response on a multiplexed channel
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    waiters: Mutex<Waiters>,
}

impl PendingRequests {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate the next request id (starts at 1)
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Reserve a slot for `id`. Dropping the slot releases it, so a reply
    /// arriving after a timeout is discarded instead of leaking.
    pub fn register(self: &Arc<Self>, id: RequestId) -> PendingSlot {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id.clone(), tx);
        PendingSlot {
            id,
            rx: Some(rx),
            pending: Arc::clone(self),
        }
    }

    /// Deliver a response to its waiter. Returns false when nobody is waiting.
    pub fn complete(&self, response: JsonRpcResponse) -> bool {
        let waiter = self.lock().remove(&response.id);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Fail every in-flight request (channel closed)
    pub fn fail_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, id: &RequestId) {
        self.lock().remove(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One reserved response slot
pub(crate) struct PendingSlot {
    id: RequestId,
    rx: Option<oneshot::Receiver<JsonRpcResponse>>,
    pending: Arc<PendingRequests>,
}

impl PendingSlot {
    /// Wait for the response, bounded by `timeout`
    pub async fn wait(mut self, timeout: Duration, method: &str) -> Result<JsonRpcResponse> {
        let rx = match self.rx.take() {
            Some(rx) => rx,
            None => anyhow::bail!("Response slot for '{}' already consumed", method),
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => anyhow::bail!("Connection closed before response to '{}'", method),
            Err(_) => anyhow::bail!(
                "Request '{}' (id {}) timed out after {}ms",
                method,
                self.id,
                timeout.as_millis()
            ),
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.release(&self.id);
    }
}
