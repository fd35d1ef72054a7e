//! JSON-Schema subset validation for tool inputs.
//!
//! Covers the keywords the built-in tool schemas (and typical LLM tool
//! definitions) use: `type`, `required`, `properties`, `items`, `enum`,
//! `minimum`/`maximum`, `minLength`/`maxLength`. Failures report field-level
//! issues with JSON paths, which flow into `TOOL_INPUT_VALIDATION` errors.

use serde_json::Value;

use crate::error::ValidationIssue;

/// Validate `input` against `schema`. Empty issue list means valid.
pub fn validate(schema: &Value, input: &Value) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    validate_node(schema, input, "", &mut issues);
    if issues.is_empty() { Ok(()) } else { Err(issues) }
}

fn push(issues: &mut Vec<ValidationIssue>, path: &str, message: impl Into<String>) {
    let path = if path.is_empty() { "$" } else { path };
    issues.push(ValidationIssue::new(path, message));
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        other => type_name(value) == other,
    }
}

fn validate_node(schema: &Value, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str)
        && !matches_type(expected, value)
    {
        push(
            issues,
            path,
            format!("expected {expected}, got {}", type_name(value)),
        );
        return;
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        push(issues, path, format!("must be one of {allowed:?}"));
    }

    match value {
        Value::String(s) => {
            if let Some(min) = schema_obj.get("minLength").and_then(Value::as_u64)
                && (s.chars().count() as u64) < min
            {
                push(issues, path, format!("must be at least {min} characters"));
            }
            if let Some(max) = schema_obj.get("maxLength").and_then(Value::as_u64)
                && (s.chars().count() as u64) > max
            {
                push(issues, path, format!("must be at most {max} characters"));
            }
        }
        Value::Number(n) => {
            let v = n.as_f64().unwrap_or(0.0);
            if let Some(min) = schema_obj.get("minimum").and_then(Value::as_f64)
                && v < min
            {
                push(issues, path, format!("must be >= {min}"));
            }
            if let Some(max) = schema_obj.get("maximum").and_then(Value::as_f64)
                && v > max
            {
                push(issues, path, format!("must be <= {max}"));
            }
        }
        Value::Object(map) => {
            if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
                for key in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(key) {
                        push(issues, &join(path, key), "is required");
                    }
                }
            }
            if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
                for (key, prop_schema) in properties {
                    if let Some(prop_value) = map.get(key) {
                        validate_node(prop_schema, prop_value, &join(path, key), issues);
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema_obj.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_node(item_schema, item, &format!("{path}[{i}]"), issues);
                }
            }
        }
        _ => {}
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
