//! Caller-supplied response schema.
//!
//! The layer does not define schemas; it carries a JSON-Schema document to
//! the service (for providers with native structured output) and uses a
//! structural check of the common keywords to decide whether a parsed
//! response is usable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named JSON-Schema descriptor for the expected response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Accepts any JSON object.
    pub fn any_object(name: impl Into<String>) -> Self {
        Self::new(name, serde_json::json!({ "type": "object" }))
    }

    /// Whether `value` has the shape this schema asks for.
    ///
    /// Only structured values (objects, arrays) qualify at the top level.
    /// Below that the check walks the schema recursively: `type` (a name or a
    /// list of names), `required`, `properties`, `items` and `enum`. Other
    /// keywords are ignored.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(value, Value::Object(_) | Value::Array(_)) && conforms(&self.schema, value)
    }
}

fn conforms(schema: &Value, value: &Value) -> bool {
    let Some(schema) = schema.as_object() else {
        return true;
    };

    let type_ok = match schema.get("type") {
        Some(Value::String(name)) => has_type(name, value),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| has_type(name, value)),
        _ => true,
    };
    if !type_ok {
        return false;
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return false;
        }
    }

    match value {
        Value::Object(map) => {
            let required_ok = schema
                .get("required")
                .and_then(Value::as_array)
                .map_or(true, |keys| {
                    keys.iter()
                        .filter_map(Value::as_str)
                        .all(|key| map.contains_key(key))
                });
            let properties_ok = schema
                .get("properties")
                .and_then(Value::as_object)
                .map_or(true, |props| {
                    props.iter().all(|(key, sub)| {
                        map.get(key).map_or(true, |field| conforms(sub, field))
                    })
                });
            required_ok && properties_ok
        }
        Value::Array(items) => schema
            .get("items")
            .map_or(true, |sub| items.iter().all(|item| conforms(sub, item))),
        _ => true,
    }
}

/// JSON-Schema primitive type test. `1.0` counts as an integer.
fn has_type(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table_schema() -> ResponseSchema {
        ResponseSchema::new(
            "table",
            json!({
                "type": "object",
                "properties": { "a": { "type": "integer" } },
                "required": ["a"]
            }),
        )
    }

    #[test]
    fn accepts_matching_object() {
        assert!(table_schema().accepts(&json!({ "a": 1 })));
    }

    #[test]
    fn rejects_missing_required_key() {
        assert!(!table_schema().accepts(&json!({ "b": 1 })));
    }

    #[test]
    fn rejects_scalars_and_wrong_shape() {
        let s = table_schema();
        assert!(!s.accepts(&json!(42)));
        assert!(!s.accepts(&json!("text")));
        assert!(!s.accepts(&json!([{ "a": 1 }])));
    }

    #[test]
    fn untyped_schema_accepts_any_structure() {
        let s = ResponseSchema::new("free", json!({}));
        assert!(s.accepts(&json!([1, 2])));
        assert!(s.accepts(&json!({})));
        assert!(!s.accepts(&json!(null)));
    }

    #[test]
    fn rejects_wrong_property_type() {
        let s = table_schema();
        assert!(!s.accepts(&json!({ "a": "not an int" })));
        assert!(!s.accepts(&json!({ "a": 1.5 })));
        assert!(s.accepts(&json!({ "a": 2.0 })));
    }

    #[test]
    fn nested_properties_and_items_are_checked() {
        let s = ResponseSchema::new(
            "table",
            json!({
                "type": "object",
                "properties": {
                    "rows": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": { "cells": { "type": "array", "items": { "type": "string" } } },
                            "required": ["cells"]
                        }
                    },
                    "caption": { "type": ["string", "null"] }
                },
                "required": ["rows"]
            }),
        );
        assert!(s.accepts(&json!({ "rows": [{ "cells": ["a", "b"] }], "caption": null })));
        assert!(!s.accepts(&json!({ "rows": [{ "cells": ["a", 3] }] })));
        assert!(!s.accepts(&json!({ "rows": [{}] })));
        assert!(!s.accepts(&json!({ "rows": [], "caption": 7 })));
    }

    #[test]
    fn enum_restricts_values() {
        let s = ResponseSchema::new(
            "kind",
            json!({
                "type": "object",
                "properties": { "kind": { "type": "string", "enum": ["table", "figure"] } }
            }),
        );
        assert!(s.accepts(&json!({ "kind": "table" })));
        assert!(!s.accepts(&json!({ "kind": "equation" })));
    }
}
