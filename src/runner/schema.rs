//! Flat argument validation against a tool's declared input schema
//!
//! Only top-level `required` and `enum` constraints are checked. Nested
//! object and array schemas are not descended into.

use serde::Serialize;
use serde_json::{Map, Value};

/// What kind of constraint was violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingRequired,
    InvalidEnum,
}

/// One violated constraint with a suggested fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    pub kind: ViolationKind,
    pub field: String,
    pub message: String,
    pub suggestion: String,
}

impl SchemaViolation {
    /// Multi-line human-readable rendering, one violation per line
    pub fn render_all(violations: &[SchemaViolation]) -> String {
        violations
            .iter()
            .map(|v| format!("  - {} ({})", v.message, v.suggestion))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Check `arguments` against `schema`. Non-object arguments count as `{}`.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Vec<SchemaViolation> {
    let empty = Map::new();
    let supplied = arguments.as_object().unwrap_or(&empty);
    let properties = schema.get("properties").and_then(Value::as_object);

    let mut violations = Vec::new();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if supplied.contains_key(field) {
                continue;
            }
            let property = properties.and_then(|p| p.get(field));
            violations.push(SchemaViolation {
                kind: ViolationKind::MissingRequired,
                field: field.to_string(),
                message: format!("Missing required field '{}'", field),
                suggestion: missing_field_suggestion(field, property),
            });
        }
    }

    if let Some(properties) = properties {
        for (field, value) in supplied {
            let Some(allowed) = properties
                .get(field)
                .and_then(|p| p.get("enum"))
                .and_then(Value::as_array)
            else {
                continue;
            };
            if allowed.contains(value) {
                continue;
            }
            violations.push(SchemaViolation {
                kind: ViolationKind::InvalidEnum,
                field: field.clone(),
                message: format!("Invalid value {} for field '{}'", value, field),
                suggestion: format!("Use one of: {}", render_literals(allowed)),
            });
        }
    }

    violations
}

fn missing_field_suggestion(field: &str, property: Option<&Value>) -> String {
    let mut suggestion = format!("Add \"{}\": {}", field, example_literal(property));

    if let Some(allowed) = property
        .and_then(|p| p.get("enum"))
        .and_then(Value::as_array)
    {
        suggestion.push_str(&format!(" (one of: {})", render_literals(allowed)));
    }
    if let Some(description) = property
        .and_then(|p| p.get("description"))
        .and_then(Value::as_str)
    {
        suggestion.push_str(&format!("; {}", description));
    }
    suggestion
}

/// Placeholder literal for a property, from its enum or declared type
fn example_literal(property: Option<&Value>) -> String {
    let Some(property) = property else {
        return "null".to_string();
    };

    if let Some(first) = property
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|values| values.first())
    {
        return first.to_string();
    }

    let declared = match property.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    };

    match declared {
        Some("string") => "\"example\"",
        Some("number") | Some("integer") => "0",
        Some("boolean") => "true",
        Some("array") => "[]",
        Some("object") => "{}",
        _ => "null",
    }
    .to_string()
}

fn render_literals(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
