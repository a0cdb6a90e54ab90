//! mcp-harness - Test harness for Model Context Protocol servers
//!
//! Connects to MCP servers over stdio, SSE or streamable HTTP, runs the
//! built-in test phases plus configured tool tests, and writes a JSON report.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

use cli::commands;

/// mcp-harness - Test MCP servers across transports
#[derive(Parser)]
#[command(
    name = "mcp-harness",
    version,
    about = "Test harness for Model Context Protocol servers",
    long_about = "Runs discovery, stability, compliance, performance and error-handling \
                  tests against MCP servers over stdio, SSE or streamable HTTP.\n\n\
                  HTTP targets with transport 'auto' are probed and verified before testing."
)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test suites against one or more servers
    Run(commands::run::RunArgs),

    /// Detect the transport an HTTP endpoint speaks
    Detect(commands::detect::DetectArgs),
}

/// Log directives for the verbosity flags. Without `-v` only errors are logged;
/// progress and the summary go through the printer.
fn log_directives(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "mcp_harness=error",
        1 => "mcp_harness=debug",
        2 => "mcp_harness=trace",
        _ => "trace",
    }
}

fn init_logging(verbosity: u8, quiet: bool) {
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_directives(verbosity, quiet)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let code = match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.verbose > 0).await?,
        Commands::Detect(args) => commands::detect::run(args).await?,
    };

    if code != cli::EXIT_SUCCESS {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_verbosity_logs_errors_only() {
        assert_eq!(log_directives(0, false), "mcp_harness=error");
        assert_eq!(log_directives(3, true), "error");
    }

    #[test]
    fn verbose_flags_raise_the_level() {
        assert_eq!(log_directives(1, false), "mcp_harness=debug");
        assert_eq!(log_directives(2, false), "mcp_harness=trace");
        assert_eq!(log_directives(5, false), "trace");
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::try_parse_from(["mcp-harness", "-vv", "detect", "http://localhost:3000/mcp"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }
}
