//! Validation of tool schema entries before they are offered to the model.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::llm::ToolDefinition;
use crate::tools::tool::ToolError;

/// Function names the OpenAI function-calling API accepts.
static TOOL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

const PRIMITIVE_TYPES: &[&str] = &[
    "string", "integer", "number", "boolean", "array", "object",
];

/// Check that a schema entry is well formed.
///
/// A valid entry has a function-safe name, a description, an object
/// `parameters` schema whose properties each declare a JSON type, and a
/// `required` list that only names declared properties.
pub fn validate_schema(def: &ToolDefinition) -> Result<(), ToolError> {
    let invalid = |reason: String| ToolError::InvalidSchema {
        name: def.name.clone(),
        reason,
    };

    if !TOOL_NAME.is_match(&def.name) {
        return Err(invalid(
            "name must be 1-64 characters of letters, digits, '_' or '-'".to_string(),
        ));
    }
    if def.description.trim().is_empty() {
        return Err(invalid("description is empty".to_string()));
    }

    let params = &def.parameters;
    if params.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("parameters.type must be \"object\"".to_string()));
    }
    let properties = params
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("parameters.properties must be an object".to_string()))?;

    for (prop, spec) in properties {
        let ty = spec.get("type").and_then(Value::as_str);
        match ty {
            Some(ty) if PRIMITIVE_TYPES.contains(&ty) => {}
            Some(ty) => return Err(invalid(format!("property '{prop}' has unknown type '{ty}'"))),
            None => return Err(invalid(format!("property '{prop}' has no type"))),
        }
    }

    match params.get("required") {
        None => {}
        Some(Value::Array(required)) => {
            for entry in required {
                let field = entry
                    .as_str()
                    .ok_or_else(|| invalid("required entries must be strings".to_string()))?;
                if !properties.contains_key(field) {
                    return Err(invalid(format!(
                        "required field '{field}' is not a declared property"
                    )));
                }
            }
        }
        Some(_) => return Err(invalid("required must be an array".to_string())),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn def(name: &str, parameters: Value) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: "does a thing".to_string(),
            parameters,
        }
    }

    #[test]
    fn accepts_well_formed_schema() {
        let d = def(
            "search_emails",
            json!({
                "type": "object",
                "properties": {
                    "keywords": {"type": "string"},
                    "max_results": {"type": "integer"}
                },
                "required": ["keywords"]
            }),
        );
        assert!(validate_schema(&d).is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        let params = json!({"type": "object", "properties": {}});
        assert!(validate_schema(&def("", params.clone())).is_err());
        assert!(validate_schema(&def("has space", params.clone())).is_err());
        assert!(validate_schema(&def(&"x".repeat(65), params)).is_err());
    }

    #[test]
    fn rejects_required_field_not_in_properties() {
        let d = def(
            "speak_text",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text", "voice"]
            }),
        );
        let err = validate_schema(&d).unwrap_err().to_string();
        assert!(err.contains("'voice'"), "{err}");
    }

    #[test]
    fn rejects_non_object_parameters_and_untyped_properties() {
        assert!(validate_schema(&def("a", json!({"type": "array"}))).is_err());
        assert!(validate_schema(&def("a", json!({"type": "object"}))).is_err());
        let untyped = json!({"type": "object", "properties": {"x": {}}});
        assert!(validate_schema(&def("a", untyped)).is_err());
        let weird = json!({"type": "object", "properties": {"x": {"type": "date"}}});
        assert!(validate_schema(&def("a", weird)).is_err());
    }

    #[test]
    fn rejects_empty_description() {
        let mut d = def("a", json!({"type": "object", "properties": {}}));
        d.description = "  ".to_string();
        assert!(validate_schema(&d).is_err());
    }
}
