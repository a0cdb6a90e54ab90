//! Connection establishment with retries and a liveness check

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::client::{McpClient, ProtocolClient};
use crate::config::RetrySettings;
use crate::errors::{HarnessError, HarnessResult};
use crate::transport::{build_transport, TransportConfig, TransportDescriptor, TransportType};

use super::context::RunContext;

/// Builds an unconnected client for a descriptor
pub type ClientFactory = Arc<
    dyn Fn(&TransportDescriptor, &TransportConfig) -> HarnessResult<Arc<dyn ProtocolClient>>
        + Send
        + Sync,
>;

/// Client over the real transport for the descriptor
pub fn default_client_factory() -> ClientFactory {
    Arc::new(|descriptor, config| {
        let transport = build_transport(descriptor, config)?;
        Ok(Arc::new(McpClient::for_harness(transport)) as Arc<dyn ProtocolClient>)
    })
}

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// At least 1
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(settings.attempts, Duration::from_millis(settings.delay_ms))
    }
}

/// A live connection bound to one descriptor
pub struct Session {
    descriptor: TransportDescriptor,
    client: Arc<dyn ProtocolClient>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(descriptor: TransportDescriptor, client: Arc<dyn ProtocolClient>) -> Self {
        Self {
            descriptor,
            client,
            closed: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &dyn ProtocolClient {
        self.client.as_ref()
    }

    pub fn descriptor(&self) -> &TransportDescriptor {
        &self.descriptor
    }

    pub fn transport_type(&self) -> TransportType {
        self.descriptor.transport_type()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the client. Only the first call reaches the client.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client.close().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("descriptor", &self.descriptor.sanitized())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Turns descriptors into live sessions
pub struct ConnectionManager {
    policy: RetryPolicy,
    context: Arc<RunContext>,
    transport_config: TransportConfig,
    factory: ClientFactory,
}

impl ConnectionManager {
    pub fn new(policy: RetryPolicy, context: Arc<RunContext>) -> Self {
        Self {
            policy,
            context,
            transport_config: TransportConfig::default(),
            factory: default_client_factory(),
        }
    }

    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Bound for one attempt: opening the transport, initialize, and the liveness check
    pub fn establish_deadline(&self) -> Duration {
        self.transport_config.timeout * 3
    }

    /// Connect, initialize and check liveness, retrying on failure
    ///
    /// Configuration errors fail immediately without retrying.
    pub async fn connect(&self, descriptor: &TransportDescriptor) -> HarnessResult<Session> {
        let transport = descriptor.transport_type();
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            self.context.record_connection_attempt();
            let client = (self.factory)(descriptor, &self.transport_config)?;

            let deadline = self.establish_deadline();
            let outcome = match tokio::time::timeout(deadline, establish(client.as_ref())).await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!(
                    "connection not established within {}ms",
                    deadline.as_millis()
                )),
            };

            match outcome {
                Ok(()) => {
                    tracing::debug!(
                        "Connected via {} to {} (attempt {})",
                        transport,
                        descriptor.target(),
                        attempt
                    );
                    return Ok(Session::new(descriptor.clone(), client));
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                    if let Err(close_err) = client.close().await {
                        tracing::debug!("Closing failed connection: {:#}", close_err);
                    }
                    tracing::warn!(
                        "Connection attempt {}/{} via {} failed: {}",
                        attempt,
                        self.policy.max_attempts,
                        transport,
                        last_error
                    );
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        Err(HarnessError::connection(
            transport.as_str(),
            self.policy.max_attempts,
            last_error,
        ))
    }
}

async fn establish(client: &dyn ProtocolClient) -> Result<()> {
    client.connect().await?;
    client
        .list_tools()
        .await
        .context("liveness check (tools/list) failed")?;
    Ok(())
}
