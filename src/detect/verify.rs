//! Handshake-based transport verification

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;

use crate::client::{McpClient, ProtocolClient};
use crate::transport::{build_transport, TransportConfig, TransportDescriptor, TransportType};

use super::DetectionResult;

/// Budget for one candidate's connect + initialize
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Tries real handshakes against candidate transports
#[derive(Debug, Clone)]
pub struct TransportVerifier {
    handshake_timeout: Duration,
}

impl Default for TransportVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportVerifier {
    pub fn new() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_timeout(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }

    /// Candidate order: the suspected HTTP transport, then the other one
    pub fn candidates(suspected: TransportType) -> Vec<TransportType> {
        match suspected.http_alternative() {
            Some(other) => vec![suspected, other],
            None => vec![TransportType::StreamableHttp, TransportType::Sse],
        }
    }

    /// First candidate to complete a handshake, or `None`
    pub async fn verify(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        auth_token: Option<&str>,
        suspected: TransportType,
    ) -> Option<DetectionResult> {
        for candidate in Self::candidates(suspected) {
            match self.handshake(candidate, url, headers, auth_token).await {
                Ok(()) => {
                    return Some(DetectionResult::detected(
                        candidate,
                        100,
                        "handshake succeeded",
                    ));
                }
                Err(e) => {
                    tracing::debug!("{} handshake with {} failed: {:#}", candidate, url, e);
                }
            }
        }
        None
    }

    async fn handshake(
        &self,
        transport_type: TransportType,
        url: &str,
        headers: &BTreeMap<String, String>,
        auth_token: Option<&str>,
    ) -> Result<()> {
        let descriptor = TransportDescriptor::http(
            transport_type,
            url,
            headers.clone(),
            auth_token.map(str::to_string),
        )?;
        let config = TransportConfig {
            timeout: self.handshake_timeout,
            ..Default::default()
        };
        let client = McpClient::for_harness(build_transport(&descriptor, &config)?);

        let outcome = tokio::time::timeout(self.handshake_timeout, client.connect()).await;

        if let Err(e) = client.close().await {
            tracing::debug!("Closing {} candidate failed: {:#}", transport_type, e);
        }

        match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => anyhow::bail!(
                "handshake timed out after {}ms",
                self.handshake_timeout.as_millis()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspected_transport_goes_first() {
        assert_eq!(
            TransportVerifier::candidates(TransportType::StreamableHttp),
            vec![TransportType::StreamableHttp, TransportType::Sse]
        );
        assert_eq!(
            TransportVerifier::candidates(TransportType::Sse),
            vec![TransportType::Sse, TransportType::StreamableHttp]
        );
        assert_eq!(
            TransportVerifier::candidates(TransportType::Stdio),
            vec![TransportType::StreamableHttp, TransportType::Sse]
        );
    }

    #[tokio::test]
    async fn unreachable_url_verifies_nothing() {
        let verifier = TransportVerifier::with_timeout(Duration::from_millis(500));
        let result = verifier
            .verify(
                "http://127.0.0.1:1/mcp",
                &BTreeMap::new(),
                None,
                TransportType::StreamableHttp,
            )
            .await;
        assert!(result.is_none());
    }
}
