//! Run command - execute suites against the configured targets

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;
use tracing::debug;

use mcp_harness::config::{HarnessConfig, TargetConfig, AUTO_TRANSPORT};
use mcp_harness::errors::{HarnessError, HarnessResult};
use mcp_harness::reporter::{print_summary, ReportGenerator};
use mcp_harness::runner::SuiteRunner;
use mcp_harness::transport::TransportType;
use mcp_harness::ui::Printer;

use crate::cli::{parse_header, render_diagnostic, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_SUCCESS};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to the TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Transport for the command-line target (stdio, sse, streamable_http, auto)
    #[arg(short, long)]
    pub transport: Option<String>,

    /// Server URL for an HTTP target
    #[arg(long)]
    pub url: Option<String>,

    /// Extra request header (KEY=VALUE), repeatable
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Bearer token for HTTP targets
    #[arg(long)]
    pub token: Option<String>,

    /// Suite name
    #[arg(long)]
    pub name: Option<String>,

    /// Per-test timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Connection attempts before giving up
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Directory for the JSON report
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Skip writing the JSON report
    #[arg(long)]
    pub no_report: bool,

    /// Server command and arguments for a stdio target
    #[arg(last = true)]
    pub command: Vec<String>,
}

pub async fn run(args: RunArgs, verbose: bool) -> Result<i32> {
    let printer = Printer::new();

    let config = match build_config(&args, verbose) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", render_diagnostic(e));
            return Ok(EXIT_CONFIG_ERROR);
        }
    };

    debug!("Running {} target(s)", config.targets.len());
    let start = Instant::now();
    let runner = SuiteRunner::new(config.clone()).with_printer(printer.clone());
    let results = runner.run_configured().await;

    let generator = ReportGenerator::from_config(&config);
    let report = generator.generate(results, runner.context(), start.elapsed());

    if !args.no_report {
        let path = generator.write(&report)?;
        printer.info(&format!("Report written to {}", path.display()));
    }
    print_summary(&printer, &report);

    Ok(if report.passed() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

/// Merge the config file with command-line overrides and validate targets
fn build_config(args: &RunArgs, verbose: bool) -> HarnessResult<HarnessConfig> {
    let mut config = HarnessConfig::load(args.config.as_deref())?;

    if let Some(timeout) = args.timeout {
        config.harness.timeout_ms = timeout;
    }
    if let Some(attempts) = args.attempts {
        config.retry.attempts = attempts;
    }
    if let Some(dir) = &args.output_dir {
        config.harness.output_dir = dir.clone();
    }
    if args.name.is_some() {
        config.harness.suite_name = args.name.clone();
    }
    config.harness.verbose |= verbose;

    if let Some(target) = command_line_target(args) {
        debug!("Using command-line target {}", target.display_name());
        config.targets = vec![target];
    }

    config.validate()?;
    if config.targets.is_empty() {
        return Err(HarnessError::invalid_config(
            "no targets: pass a server command after --, a --url, or [[targets]] in the config",
        ));
    }
    for target in config.targets.iter().filter(|t| !t.is_auto()) {
        target.to_descriptor()?;
    }
    Ok(config)
}

fn command_line_target(args: &RunArgs) -> Option<TargetConfig> {
    if args.command.is_empty() && args.url.is_none() {
        return None;
    }

    let transport = args.transport.clone().unwrap_or_else(|| {
        if args.command.is_empty() {
            AUTO_TRANSPORT.to_string()
        } else {
            TransportType::Stdio.as_str().to_string()
        }
    });
    let (command, command_args) = match args.command.split_first() {
        Some((command, rest)) => (Some(command.clone()), rest.to_vec()),
        None => (None, Vec::new()),
    };

    Some(TargetConfig {
        name: None,
        transport,
        command,
        args: command_args,
        env: Default::default(),
        url: args.url.clone(),
        headers: args.headers.iter().cloned().collect(),
        auth_token: args.token.clone(),
    })
}
