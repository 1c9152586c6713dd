//! Shape-check tool call arguments against a tool's JSON Schema.

use crate::error::ValidationError;

/// Validate tool arguments against a JSON Schema.
///
/// Top-level only: object type, required field presence, property types,
/// string enums, and integer bounds. Returns the first violation found.
pub fn validate_arguments(
    args: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<(), ValidationError> {
    let obj = match args.as_object() {
        Some(obj) => obj,
        None => {
            return Err(ValidationError::new(format!(
                "expected object arguments, got {}",
                json_type_name(args)
            )))
        }
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(name) {
                return Err(ValidationError::new(format!(
                    "missing required argument: {name}"
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) else {
        return Ok(());
    };

    for (key, value) in obj {
        let Some(prop) = properties.get(key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if let Some(expected) = prop.get("type").and_then(|v| v.as_str()) {
            if !value_matches_type(value, expected) {
                return Err(ValidationError::new(format!(
                    "argument {key} expected type {expected}, got {}",
                    json_type_name(value)
                )));
            }
        }
        if let (Some(allowed), Some(s)) = (prop.get("enum").and_then(|v| v.as_array()), value.as_str()) {
            if !allowed.iter().filter_map(|a| a.as_str()).any(|a| a.eq_ignore_ascii_case(s)) {
                return Err(ValidationError::new(format!(
                    "argument {key} must be one of {}",
                    allowed
                        .iter()
                        .filter_map(|a| a.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }
        if let Some(n) = as_integer(value) {
            let min = prop.get("minimum").and_then(|v| v.as_i64());
            let max = prop.get("maximum").and_then(|v| v.as_i64());
            if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                return Err(ValidationError::new(format!(
                    "argument {key} out of range ({}..={})",
                    min.unwrap_or(i64::MIN),
                    max.unwrap_or(i64::MAX)
                )));
            }
        }
    }

    Ok(())
}

fn as_integer(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_matches_type(value: &serde_json::Value, expected: &str) -> bool {
    match expected {
        // Models routinely quote numbers and unquote ports; the builders cope with both.
        "string" => value.is_string() || value.is_number(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64() || value.as_str().is_some_and(|s| s.trim().parse::<i64>().is_ok()),
        "boolean" => value.is_boolean() || value.as_str().is_some_and(|s| s == "true" || s == "false"),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::AgentToolParameters;
    use serde_json::json;

    fn schema() -> serde_json::Value {
        AgentToolParameters::object()
            .string("target", "Host", true)
            .string_enum("scan_type", "Kind", &["quick", "full"], false)
            .integer("count", "Count", (1, 10), false)
            .build()
            .schema
    }

    #[test]
    fn accepts_well_formed_arguments() {
        let args = json!({ "target": "10.0.0.5", "scan_type": "quick", "count": "4" });
        assert!(validate_arguments(&args, &schema()).is_ok());
    }

    #[test]
    fn rejects_non_object_arguments() {
        let err = validate_arguments(&json!("10.0.0.5"), &schema()).unwrap_err();
        assert_eq!(err.reason, "expected object arguments, got string");
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate_arguments(&json!({}), &schema()).unwrap_err();
        assert_eq!(err.reason, "missing required argument: target");
    }

    #[test]
    fn rejects_value_outside_enum() {
        let args = json!({ "target": "h", "scan_type": "aggressive" });
        let err = validate_arguments(&args, &schema()).unwrap_err();
        assert_eq!(err.reason, "argument scan_type must be one of quick, full");
    }

    #[test]
    fn rejects_integer_out_of_range() {
        let args = json!({ "target": "h", "count": 50 });
        assert!(validate_arguments(&args, &schema()).is_err());
    }

    #[test]
    fn ignores_unknown_properties() {
        let args = json!({ "target": "h", "extra": [1, 2] });
        assert!(validate_arguments(&args, &schema()).is_ok());
    }
}
