//! "Did you mean?" suggestions using fuzzy string matching
//!
//! Jaro-Winkler similarity over the candidate names the server or the
//! harness actually knows about.

use strsim::jaro_winkler;

/// Default similarity threshold for suggestions (0.0 to 1.0)
const DEFAULT_THRESHOLD: f64 = 0.6;

/// Find the most similar string from a list of candidates
///
/// Returns the best match if it exceeds the threshold, or None otherwise.
pub fn find_similar<'a>(input: &str, candidates: &[&'a str], threshold: f64) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (jaro_winkler(input, c), *c))
        .filter(|(score, _)| *score > threshold)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, name)| name)
}

/// Suggest the closest advertised tool name for a tool that was not found
pub fn suggest_tool(unknown: &str, available: &[String]) -> Option<String> {
    let candidates: Vec<_> = available.iter().map(|s| s.as_str()).collect();
    find_similar(unknown, &candidates, DEFAULT_THRESHOLD).map(str::to_string)
}

/// Generate a suggestion for an unknown transport name
pub fn suggest_transport(unknown: &str) -> String {
    let transports = ["stdio", "sse", "streamable_http", "auto"];

    if let Some(suggestion) = find_similar(unknown, &transports, DEFAULT_THRESHOLD) {
        format!(
            "Did you mean '{}'?\n\nAvailable transports: {}",
            suggestion,
            transports.join(", ")
        )
    } else {
        format!(
            "Unknown transport '{}'.\n\nAvailable transports: {}",
            unknown,
            transports.join(", ")
        )
    }
}

/// Troubleshooting hint for a connection failure, keyed off the last error text
pub fn suggest_connection_fix(error: &str) -> String {
    let error_lower = error.to_lowercase();

    if error_lower.contains("connection refused") {
        "The server may not be running. Check the URL and port.".to_string()
    } else if error_lower.contains("timed out") || error_lower.contains("timeout") {
        "The server is not responding. Try increasing --timeout or check server logs.".to_string()
    } else if error_lower.contains("no such file") || error_lower.contains("not found") {
        "The server executable was not found. Check the command path and runtime.".to_string()
    } else if error_lower.contains("401") || error_lower.contains("403") {
        "The server rejected the credentials. Check --token and auth headers.".to_string()
    } else if error_lower.contains("406") || error_lower.contains("event-stream") {
        "The server may use a different HTTP transport. Try --transport auto.".to_string()
    } else {
        "Check the target configuration and try again.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_similar_matches_typo() {
        let candidates = ["add", "multiply", "subtract"];
        assert_eq!(find_similar("multiplY", &candidates, 0.6), Some("multiply"));
        assert_eq!(find_similar("zzzzzz", &candidates, 0.6), None);
    }

    #[test]
    fn suggest_tool_uses_available_names() {
        let available = vec!["add".to_string(), "multiply".to_string()];
        assert_eq!(suggest_tool("multipy", &available), Some("multiply".to_string()));
        assert_eq!(suggest_tool("x", &[]), None);
    }

    #[test]
    fn suggest_transport_close_match() {
        let msg = suggest_transport("stdoi");
        assert!(msg.contains("Did you mean 'stdio'"));
    }

    #[test]
    fn suggest_transport_lists_options() {
        let msg = suggest_transport("websocket");
        assert!(msg.contains("streamable_http"));
    }

    #[test]
    fn connection_fix_by_error_kind() {
        assert!(suggest_connection_fix("Connection refused (os error 111)").contains("running"));
        assert!(suggest_connection_fix("No such file or directory").contains("executable"));
        assert!(suggest_connection_fix("HTTP error 406").contains("auto"));
    }
}
