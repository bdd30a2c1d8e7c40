//! JSON codec for text frames.
//!
//! Outbound values are serialized compactly (no whitespace between tokens,
//! always a single line). Inbound text must decode to a JSON object; empty
//! text is rejected rather than ignored.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Map, Value, from_str, to_string};

use crate::error::{DecodeError, Result};

// ============================================================================
// Types
// ============================================================================

/// A decoded inbound message.
pub type JsonObject = Map<String, Value>;

// ============================================================================
// Encode / Decode
// ============================================================================

/// Serializes a value into compact single-line JSON text.
///
/// # Errors
///
/// Returns [`Error::Json`](crate::Error::Json) if the value cannot be
/// serialized (e.g. a map with non-string keys).
pub fn encode<T>(value: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    Ok(to_string(value)?)
}

/// Decodes text into a JSON object.
///
/// # Errors
///
/// - [`DecodeError::Empty`] if the text is empty or whitespace
/// - [`DecodeError::Malformed`] if the text is not well-formed JSON
/// - [`DecodeError::NotAnObject`] if the top-level value is not an object
pub fn decode(text: &str) -> std::result::Result<JsonObject, DecodeError> {
    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    match from_str::<Value>(text)? {
        Value::Object(object) => Ok(object),
        other => Err(DecodeError::NotAnObject {
            found: type_name(&other),
        }),
    }
}

/// Returns the JSON type name of a value.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_encode_is_compact() {
        let text = encode(&json!({ "key": "value", "num": 128 })).unwrap();
        assert!(!text.contains(char::is_whitespace));
    }

    #[test]
    fn test_encode_escapes_newlines() {
        let text = encode(&json!({ "text": "line one\nline two" })).unwrap();
        assert!(!text.contains('\n'));
    }

    #[test]
    fn test_decode_object() {
        let object = decode(r#"{"key":"value","num":128}"#).unwrap();
        assert_eq!(object.get("key"), Some(&json!("value")));
        assert_eq!(object.get("num"), Some(&json!(128)));
    }

    #[test]
    fn test_decode_empty_is_error() {
        assert!(matches!(decode(""), Err(DecodeError::Empty)));
        assert!(matches!(decode("  \n\t"), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_malformed_is_error() {
        assert!(matches!(decode("{invalid{"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(r#"{"a":1"#), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_non_object_is_error() {
        assert!(matches!(
            decode("[1,2,3]"),
            Err(DecodeError::NotAnObject { found: "array" })
        ));
        assert!(matches!(
            decode("42"),
            Err(DecodeError::NotAnObject { found: "number" })
        ));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 \\n\"\\\\]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_object_round_trip(
            fields in prop::collection::btree_map("[a-z_]{1,10}", arb_json(), 0..8)
        ) {
            let object: JsonObject = fields.into_iter().collect();
            let text = encode(&object).unwrap();
            prop_assert!(!text.contains('\n'));
            prop_assert_eq!(decode(&text).unwrap(), object);
        }

        #[test]
        fn prop_garbage_never_panics(text in "\\PC{0,64}") {
            let _ = decode(&text);
        }
    }
}
