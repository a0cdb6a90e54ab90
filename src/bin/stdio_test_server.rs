//! Minimal MCP server over stdio used by the integration tests
//!
//! Speaks newline-delimited JSON-RPC. Offers `add` and `multiply`, has no
//! resources or prompts, and rejects unknown tools and non-object arguments.
//! With `MCP_HARNESS_TEST_FAIL_LIST_TOOLS` set, every `tools/list` fails so
//! the liveness check never passes.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

use mcp_harness::protocol::jsonrpc::{
    error_codes, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
};
use mcp_harness::protocol::mcp::{methods, CallToolResult, LATEST_PROTOCOL_VERSION};

const FAIL_LIST_TOOLS_ENV: &str = "MCP_HARNESS_TEST_FAIL_LIST_TOOLS";

fn main() {
    let fail_list_tools = std::env::var_os(FAIL_LIST_TOOLS_ENV).is_some();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let request = match JsonRpcMessage::parse(&line) {
            Ok(JsonRpcMessage::Request(request)) => request,
            Ok(_) => continue,
            Err(_) => continue,
        };
        let response = handle_request(request, fail_list_tools);
        if let Ok(payload) = serde_json::to_string(&response) {
            let _ = writeln!(stdout, "{payload}");
            let _ = stdout.flush();
        }
    }
}

fn handle_request(request: JsonRpcRequest, fail_list_tools: bool) -> JsonRpcResponse {
    let id = request.id.clone();
    let result = match request.method.as_str() {
        methods::INITIALIZE => Ok(json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "stdio-test-server", "version": env!("CARGO_PKG_VERSION")},
        })),
        methods::TOOLS_LIST if fail_list_tools => Err(JsonRpcError::new(
            error_codes::INTERNAL_ERROR,
            "tools/list disabled",
        )),
        methods::TOOLS_LIST => Ok(json!({"tools": tools()})),
        methods::TOOLS_CALL => call_tool(request.params.unwrap_or(Value::Null)),
        other => Err(JsonRpcError::method_not_found(other)),
    };

    match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(error) => JsonRpcResponse::error(id, error),
    }
}

fn tools() -> Value {
    let schema = json!({
        "type": "object",
        "properties": {
            "a": {"type": "number", "description": "First operand"},
            "b": {"type": "number", "description": "Second operand"}
        },
        "required": ["a", "b"]
    });
    json!([
        {"name": "add", "description": "Add two numbers", "inputSchema": schema},
        {"name": "multiply", "description": "Multiply two numbers", "inputSchema": schema},
    ])
}

fn call_tool(params: Value) -> Result<Value, JsonRpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::invalid_params("missing tool name"))?;
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
    let Some(arguments) = arguments.as_object() else {
        return Err(JsonRpcError::invalid_params("arguments must be an object"));
    };

    let operation: fn(f64, f64) -> f64 = match name {
        "add" => |a, b| a + b,
        "multiply" => |a, b| a * b,
        _ => return Err(JsonRpcError::invalid_params(format!("Unknown tool: {name}"))),
    };

    let operands = (
        arguments.get("a").and_then(Value::as_f64),
        arguments.get("b").and_then(Value::as_f64),
    );
    let result = match operands {
        (Some(a), Some(b)) => CallToolResult::text(format_number(operation(a, b))),
        _ => CallToolResult::error_text("both 'a' and 'b' must be numbers"),
    };
    serde_json::to_value(result).map_err(|e| JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string()))
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
