//! CLI module - Command implementations

pub mod commands;

use mcp_harness::errors::HarnessError;

/// Every suite passed
pub const EXIT_SUCCESS: i32 = 0;
/// At least one suite failed
pub const EXIT_FAILURE: i32 = 1;
/// Configuration was rejected before any suite ran
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Parse a `KEY=VALUE` header argument
pub fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid header '{}': expected KEY=VALUE", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid header '{}': empty name", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Full diagnostic rendering: message, code and help
pub fn render_diagnostic(error: HarnessError) -> String {
    format!("{:?}", miette::Report::new(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_include_code_and_help() {
        let rendered = render_diagnostic(HarnessError::invalid_transport("stdoi"));
        assert!(rendered.contains("mcp_harness::config::transport"), "{}", rendered);
        assert!(rendered.contains("stdoi"), "{}", rendered);
        assert!(rendered.contains("stdio"), "{}", rendered);
    }

    #[test]
    fn parses_headers() {
        assert_eq!(
            parse_header("X-Api-Key=abc=def").unwrap(),
            ("X-Api-Key".to_string(), "abc=def".to_string())
        );
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header("=value").is_err());
    }
}
