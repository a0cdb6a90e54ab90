//! Detect command - report which transport a URL speaks

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use mcp_harness::detect::{detect_transport, with_bearer, TransportProber};

use crate::cli::{parse_header, EXIT_FAILURE, EXIT_SUCCESS};

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Server URL
    pub url: String,

    /// Extra request header (KEY=VALUE), repeatable
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Bearer token sent with the probe and handshakes
    #[arg(long)]
    pub token: Option<String>,

    /// Only probe; skip handshake verification
    #[arg(long)]
    pub no_verify: bool,
}

/// Print the detection result as JSON. Fails when nothing was detected.
pub async fn run(args: DetectArgs) -> Result<i32> {
    let headers: BTreeMap<String, String> = args.headers.into_iter().collect();

    debug!("Detecting transport for {}", args.url);
    let result = if args.no_verify {
        TransportProber::new()
            .probe(&args.url, &with_bearer(&headers, args.token.as_deref()))
            .await
    } else {
        detect_transport(&args.url, &headers, args.token.as_deref()).await
    };

    let json = serde_json::to_string_pretty(&result).context("failed to serialize result")?;
    println!("{}", json);

    Ok(if result.transport.is_some() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
