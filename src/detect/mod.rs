//! Transport auto-detection
//!
//! Detection is two separate steps. [`probe::TransportProber`] sends one
//! lightweight GET and classifies the reply without any handshake.
//! [`verify::TransportVerifier`] then performs real handshakes against the
//! candidate transports. The probe only orders the candidates; a verified
//! result is the only one reported with full confidence.

pub mod probe;
pub mod verify;

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::config::TargetConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::transport::{url_transport_hint, TransportDescriptor, TransportType};

pub use probe::{classify, TransportProber};
pub use verify::TransportVerifier;

/// Label used when no transport could be determined
pub const UNKNOWN_LABEL: &str = "unknown";

/// Outcome of probing or verifying a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    #[serde(serialize_with = "serialize_label")]
    pub transport: Option<TransportType>,
    /// 0 to 100
    pub confidence: u8,
    pub reason: String,
}

impl DetectionResult {
    pub fn detected(transport: TransportType, confidence: u8, reason: impl Into<String>) -> Self {
        Self {
            transport: Some(transport),
            confidence: confidence.min(100),
            reason: reason.into(),
        }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            transport: None,
            confidence: 0,
            reason: reason.into(),
        }
    }

    /// Transport label, or `unknown`
    pub fn label(&self) -> &'static str {
        self.transport.map(|t| t.as_str()).unwrap_or(UNKNOWN_LABEL)
    }
}

fn serialize_label<S: Serializer>(
    transport: &Option<TransportType>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(transport.map(|t| t.as_str()).unwrap_or(UNKNOWN_LABEL))
}

/// Headers plus `Authorization: Bearer` when a token is given
pub fn with_bearer(
    headers: &BTreeMap<String, String>,
    auth_token: Option<&str>,
) -> BTreeMap<String, String> {
    let mut headers = headers.clone();
    if let Some(token) = auth_token {
        headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    }
    headers
}

/// Probe a URL and confirm the result with handshakes
///
/// The token is sent with the probe and with every handshake. Returns the
/// verified transport, or an `unknown` result whose reason carries the probe
/// verdict when no candidate completed a handshake.
pub async fn detect_transport(
    url: &str,
    headers: &BTreeMap<String, String>,
    auth_token: Option<&str>,
) -> DetectionResult {
    let probed = TransportProber::new()
        .probe(url, &with_bearer(headers, auth_token))
        .await;
    tracing::debug!(
        "Probe of {}: {} ({}%): {}",
        url,
        probed.label(),
        probed.confidence,
        probed.reason
    );

    let suspected = match probed.transport {
        Some(transport) if transport.is_http() => transport,
        _ => url_transport_hint(url),
    };

    match TransportVerifier::new()
        .verify(url, headers, auth_token, suspected)
        .await
    {
        Some(verified) => verified,
        None => DetectionResult::unknown(format!(
            "no transport completed a handshake (probe: {}, {}%, {})",
            probed.label(),
            probed.confidence,
            probed.reason
        )),
    }
}

/// Turn an `auto` target into a concrete descriptor
///
/// Targets with an explicit transport are converted directly.
pub async fn resolve_auto(target: &TargetConfig) -> HarnessResult<TransportDescriptor> {
    if !target.is_auto() {
        return target.to_descriptor();
    }

    let url = target
        .url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| {
            HarnessError::invalid_config("auto transport detection requires a url")
        })?;

    let detection = detect_transport(url, &target.headers, target.auth_token.as_deref()).await;
    match detection.transport {
        Some(transport) => {
            tracing::debug!(
                "Detected {} transport for {} ({})",
                transport,
                url,
                detection.reason
            );
            target.with_transport(transport).to_descriptor()
        }
        None => Err(HarnessError::connection(
            "auto",
            0,
            format!("transport could not be detected: {}", detection.reason),
        )),
    }
}
