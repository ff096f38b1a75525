//! JSON Schema compilation shared by tool registration and elicitation.

use jsonschema::{Draft, Validator};
use serde_json::Value;

/// Compile `schema` once into a reusable validator.
pub fn compile(schema: &Value) -> Result<Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| format!("invalid schema: {err}"))
}

/// Every violation of `validator` by `instance`, empty when valid.
#[must_use]
pub fn violations(validator: &Validator, instance: &Value) -> Vec<String> {
    validator.iter_errors(instance).map(|err| err.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_and_validate() {
        let validator = compile(&json!({
            "type": "object",
            "properties": { "genre": { "type": "string" } },
            "required": ["genre"]
        }))
        .unwrap();

        assert!(violations(&validator, &json!({ "genre": "Action" })).is_empty());
        assert!(!violations(&validator, &json!({ "genre": 3 })).is_empty());
        assert!(!violations(&validator, &json!({})).is_empty());
    }

    #[test]
    fn test_invalid_schema_rejected() {
        assert!(compile(&json!({ "type": "not-a-type" })).is_err());
    }
}
