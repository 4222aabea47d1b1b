//! Types related to GraphQL requests, responses, etc.

mod request;
mod response;

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;

pub use self::request::Request;
pub use self::response::Response;
use crate::json_ext::Object;
use crate::json_ext::Value;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
/// The error location
pub struct Location {
    /// The line number
    pub line: u32,
    /// The column number
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a GraphQL [`Response`].
///
/// Converted to (or from) JSON with serde.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[non_exhaustive]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the GraphQL document of the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// If this is a field error, the JSON path to that field in [`Response::data`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Value>,

    /// The optional GraphQL extensions for this error.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// Returns a builder that builds a GraphQL [`Error`] from its components.
    ///
    /// `.message()` is required. `.extension_code()` sets the `code` extension
    /// unless `.extensions()` already carries one.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Value>,
        extension_code: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        mut extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        if let Some(code) = extension_code {
            extensions
                .entry("code")
                .or_insert(Value::String(ByteString::from(code)));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    pub(crate) fn from_value(value: Value) -> Result<Error, String> {
        let mut object =
            ensure_object!(value).map_err(|error| format!("invalid error within `errors`: {error}"))?;

        let extensions =
            extract_key_value_from_object!(object, "extensions", Value::Object(o) => o)
                .map_err(|err| format!("invalid `extensions` within error: {err}"))?
                .unwrap_or_default();
        let message = match extract_key_value_from_object!(object, "message", Value::String(s) => s)
        {
            Ok(Some(s)) => Ok(s.as_str().to_string()),
            Ok(None) => Err("missing required `message` property within error".to_owned()),
            Err(err) => Err(format!("invalid `message` within error: {err}")),
        }?;
        let locations = extract_key_value_from_object!(object, "locations")
            .map(skip_invalid_locations)
            .map(serde_json_bytes::from_value)
            .transpose()
            .map_err(|err| format!("invalid `locations` within error: {err}"))?
            .unwrap_or_default();
        let path = extract_key_value_from_object!(object, "path");

        Ok(Self {
            message,
            locations,
            path,
            extensions,
        })
    }

    /// Extract the error code from [`Error::extensions`] as a String if it is set.
    pub fn extension_code(&self) -> Option<String> {
        self.extensions.get("code").and_then(|c| match c {
            Value::String(s) => Some(s.as_str().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Bool(_) => None,
        })
    }
}

/// GraphQL spec require that both "line" and "column" are positive numbers.
/// However GraphQL Java and GraphQL Kotlin return `{ "line": -1, "column": -1 }`
/// if they can't determine error location inside query.
/// This function removes such locations from supplied value.
fn skip_invalid_locations(mut value: Value) -> Value {
    if let Some(array) = value.as_array_mut() {
        array.retain(|location| {
            location.get("line") != Some(&Value::from(-1))
                || location.get("column") != Some(&Value::from(-1))
        })
    }
    value
}

/// Displays (only) the error message.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn extension_code_does_not_override_explicit_code() {
        let error = Error::builder()
            .message("boom")
            .extension("code", "ORIGINAL")
            .extension_code("IGNORED")
            .build();
        assert_eq!(error.extension_code().as_deref(), Some("ORIGINAL"));
    }

    #[test]
    fn from_value_keeps_path_and_drops_negative_locations() {
        let error = Error::from_value(json!({
            "message": "Cannot query field",
            "locations": [{ "line": -1, "column": -1 }, { "line": 2, "column": 3 }],
            "path": ["me", 0, "name"],
            "extensions": { "code": "GRAPHQL_VALIDATION_FAILED" }
        }))
        .unwrap();

        assert_eq!(error.message, "Cannot query field");
        assert_eq!(error.locations, vec![Location { line: 2, column: 3 }]);
        assert_eq!(error.path, Some(json!(["me", 0, "name"])));
        assert_eq!(
            error.extension_code().as_deref(),
            Some("GRAPHQL_VALIDATION_FAILED")
        );
    }

    #[test]
    fn from_value_requires_a_message() {
        let error = Error::from_value(json!({ "extensions": {} })).unwrap_err();
        assert_eq!(error, "missing required `message` property within error");
    }
}
