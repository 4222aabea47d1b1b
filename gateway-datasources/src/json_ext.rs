//! JSON helpers shared by the GraphQL types.

use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub(crate) use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// Unwraps a [`Value::Object`] or fails with a description of what was found instead.
macro_rules! ensure_object {
    ($value:expr) => {{
        match $value {
            $crate::json_ext::Value::Object(o) => Ok(o),
            other => Err(format!(
                "invalid type: expected an object, found {}",
                $crate::json_ext::type_name(&other)
            )),
        }
    }};
}

/// Removes `$key` from `$object`.
///
/// With a pattern, the removed value must match it; `null` and a missing key both give `None`.
macro_rules! extract_key_value_from_object {
    ($object:expr, $key:literal, $pattern:pat => $var:ident) => {{
        match $object.remove($key) {
            Some($pattern) => Ok(Some($var)),
            None | Some($crate::json_ext::Value::Null) => Ok(None),
            Some(other) => Err(format!(
                "invalid type for key `{}`: found {}",
                $key,
                $crate::json_ext::type_name(&other)
            )),
        }
    }};
    ($object:expr, $key:literal) => {{
        match $object.remove($key) {
            None | Some($crate::json_ext::Value::Null) => None,
            Some(value) => Some(value),
        }
    }};
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn ensure_object_rejects_arrays() {
        let result: Result<Object, String> = ensure_object!(json!([1, 2]));
        assert_eq!(
            result.unwrap_err(),
            "invalid type: expected an object, found an array"
        );
    }

    #[test]
    fn extract_key_value_treats_null_as_missing() {
        let mut object = ensure_object!(json!({ "errors": null, "label": 3 })).unwrap();

        let errors: Result<Option<Vec<Value>>, String> =
            extract_key_value_from_object!(object, "errors", Value::Array(a) => a);
        assert_eq!(errors.unwrap(), None);

        let label: Result<Option<ByteString>, String> =
            extract_key_value_from_object!(object, "label", Value::String(s) => s);
        assert_eq!(label.unwrap_err(), "invalid type for key `label`: found a number");
        assert!(object.is_empty());
    }
}
