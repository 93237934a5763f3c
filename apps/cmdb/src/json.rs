//! Conversion between engine documents and JSON.
//!
//! Documents hold integers, strings, booleans, nulls and flat lists only.
//! JSON floats and nested objects are rejected.

use cmdb_core::{CmdbError, Document, Value};
use serde_json::{Map, Number};

/// Plain JSON form of a value.
#[must_use]
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number(Number::from(*i)),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
    }
}

/// JSON object with one member per field, in field order.
#[must_use]
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    let members: Map<String, serde_json::Value> = doc
        .iter()
        .map(|(field, value)| (field.clone(), value_to_json(value)))
        .collect();
    serde_json::Value::Object(members)
}

/// Parse a JSON object into a document.
pub fn document_from_json(raw: &str) -> Result<Document, CmdbError> {
    let parsed: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| CmdbError::Serialization(e.to_string()))?;
    let serde_json::Value::Object(members) = parsed else {
        return Err(CmdbError::Serialization(
            "instance data must be a JSON object".to_string(),
        ));
    };
    members
        .into_iter()
        .map(|(field, value)| json_to_value(&field, value).map(|value| (field, value)))
        .collect()
}

fn json_to_value(field: &str, value: serde_json::Value) -> Result<Value, CmdbError> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| CmdbError::ParamsInvalid(field.to_string())),
        serde_json::Value::String(s) => Ok(Value::Str(s)),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    Err(CmdbError::ParamsInvalid(field.to_string()))
                }
                scalar => json_to_value(field, scalar),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        serde_json::Value::Object(_) => Err(CmdbError::ParamsInvalid(field.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdb_core::document;

    #[test]
    fn parses_flat_objects() {
        let doc = document_from_json(r#"{"bk_set_name":"web","bk_parent_id":3,"tags":["a","b"]}"#)
            .expect("parse");
        assert_eq!(doc.get("bk_set_name"), Some(&Value::from("web")));
        assert_eq!(doc.get("bk_parent_id"), Some(&Value::Int(3)));
        assert_eq!(doc.get("tags"), Some(&Value::from(vec!["a", "b"])));
    }

    #[test]
    fn rejects_floats_and_nesting() {
        assert!(matches!(
            document_from_json(r#"{"weight":1.5}"#),
            Err(CmdbError::ParamsInvalid(f)) if f == "weight"
        ));
        assert!(matches!(
            document_from_json(r#"{"meta":{"a":1}}"#),
            Err(CmdbError::ParamsInvalid(_))
        ));
        assert!(matches!(
            document_from_json("[1,2]"),
            Err(CmdbError::Serialization(_))
        ));
    }

    #[test]
    fn documents_render_as_plain_json() {
        let doc = document([("bk_biz_id", Value::Int(2)), ("name", Value::from("shop"))]);
        assert_eq!(
            document_to_json(&doc),
            serde_json::json!({"bk_biz_id": 2, "name": "shop"})
        );
    }
}
