use serde_json::Value;

use crate::error::LlmError;
use crate::message::Tool;

/// Validate tool call arguments against the tool's declared JSON Schema
/// (a Draft 2019-09 subset: `type`, `properties`, `required`, `items`, `enum`,
/// `const`, `minLength`/`maxLength`, `minimum`/`maximum`, `oneOf`/`anyOf`/`allOf`,
/// and `$ref` resolved relative to the tool's own schema root).
///
/// Returns the preview-friendly error message used by
/// [`LlmError::SchemaValidation`] on failure.
pub fn validate_tool_arguments(tool: &Tool, arguments: &Value) -> Result<(), LlmError> {
    validate(arguments, &tool.parameters, &tool.parameters, "").map_err(|message| LlmError::SchemaValidation {
        tool: tool.name.clone(),
        message: format!("{message} (received: {})", preview(arguments)),
    })
}

fn preview(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.len() > 200 { format!("{}...", &rendered[..200]) } else { rendered }
}

fn validate(value: &Value, schema: &Value, root: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        let resolved = resolve_ref(root, reference)
            .ok_or_else(|| format!("{path}: unresolvable $ref '{reference}'"))?;
        return validate(value, resolved, root, path);
    }

    if let Some(one_of) = schema.get("oneOf").and_then(Value::as_array) {
        let matches = one_of.iter().filter(|s| validate(value, s, root, path).is_ok()).count();
        if matches != 1 {
            return Err(format!("{path}: expected exactly one oneOf branch to match, {matches} matched"));
        }
    }

    if let Some(any_of) = schema.get("anyOf").and_then(Value::as_array) {
        if !any_of.iter().any(|s| validate(value, s, root, path).is_ok()) {
            return Err(format!("{path}: no anyOf branch matched"));
        }
    }

    if let Some(all_of) = schema.get("allOf").and_then(Value::as_array) {
        for sub in all_of {
            validate(value, sub, root, path)?;
        }
    }

    if let Some(constant) = schema.get("const")
        && value != constant
    {
        return Err(format!("{path}: expected const {constant}, got {value}"));
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        return Err(format!("{path}: {value} is not one of the allowed enum values"));
    }

    if let Some(expected_type) = schema.get("type").and_then(Value::as_str) {
        validate_type(value, expected_type, path)?;
    }

    match value {
        Value::Object(map) => {
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for key in required {
                    if let Some(key) = key.as_str()
                        && !map.contains_key(key)
                    {
                        return Err(format!("{path}: missing required property '{key}'"));
                    }
                }
            }

            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (key, sub_schema) in properties {
                    if let Some(sub_value) = map.get(key) {
                        validate(sub_value, sub_schema, root, &format!("{path}.{key}"))?;
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate(item, item_schema, root, &format!("{path}[{i}]"))?;
                }
            }
        }
        Value::String(s) => {
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64)
                && (s.chars().count() as u64) < min
            {
                return Err(format!("{path}: string shorter than minLength {min}"));
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64)
                && (s.chars().count() as u64) > max
            {
                return Err(format!("{path}: string longer than maxLength {max}"));
            }
        }
        Value::Number(n) => {
            if let Some(min) = schema.get("minimum").and_then(Value::as_f64)
                && n.as_f64().is_some_and(|v| v < min)
            {
                return Err(format!("{path}: number below minimum {min}"));
            }
            if let Some(max) = schema.get("maximum").and_then(Value::as_f64)
                && n.as_f64().is_some_and(|v| v > max)
            {
                return Err(format!("{path}: number above maximum {max}"));
            }
        }
        _ => {}
    }

    Ok(())
}

fn validate_type(value: &Value, expected: &str, path: &str) -> Result<(), String> {
    let matches = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true, // unrecognized type keyword: don't reject on our own ignorance
    };

    if matches {
        Ok(())
    } else {
        Err(format!("{path}: expected type '{expected}', got {value}"))
    }
}

/// Resolve a `$ref` string (e.g. `#/$defs/Point`) against the schema root.
/// Only local, same-document references are supported.
fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    if pointer.is_empty() {
        return Some(root);
    }
    root.pointer(pointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(parameters: Value) -> Tool {
        Tool { name: "t".into(), description: String::new(), parameters }
    }

    #[test]
    fn accepts_matching_object() {
        let t = tool(json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"],
        }));
        assert!(validate_tool_arguments(&t, &json!({"query": "x"})).is_ok());
    }

    #[test]
    fn rejects_missing_required_property() {
        let t = tool(json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"],
        }));
        let err = validate_tool_arguments(&t, &json!({})).unwrap_err();
        assert!(matches!(err, LlmError::SchemaValidation { .. }));
    }

    #[test]
    fn enforces_enum() {
        let t = tool(json!({
            "type": "object",
            "properties": {"unit": {"type": "string", "enum": ["celsius", "fahrenheit"]}},
        }));
        assert!(validate_tool_arguments(&t, &json!({"unit": "celsius"})).is_ok());
        assert!(validate_tool_arguments(&t, &json!({"unit": "kelvin"})).is_err());
    }

    #[test]
    fn resolves_local_ref() {
        let t = tool(json!({
            "type": "object",
            "properties": {"point": {"$ref": "#/$defs/Point"}},
            "$defs": {"Point": {"type": "object", "required": ["x"]}},
        }));
        assert!(validate_tool_arguments(&t, &json!({"point": {"x": 1}})).is_ok());
        assert!(validate_tool_arguments(&t, &json!({"point": {}})).is_err());
    }

    #[test]
    fn enforces_numeric_bounds() {
        let t = tool(json!({"type": "object", "properties": {"n": {"type": "number", "minimum": 0, "maximum": 10}}}));
        assert!(validate_tool_arguments(&t, &json!({"n": 5})).is_ok());
        assert!(validate_tool_arguments(&t, &json!({"n": -1})).is_err());
        assert!(validate_tool_arguments(&t, &json!({"n": 11})).is_err());
    }
}
