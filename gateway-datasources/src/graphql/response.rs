use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;

use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// A GraphQL response envelope as returned by a subgraph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(data: Option<Value>, errors: Vec<Error>, extensions: Map<ByteString, Value>) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// Parse a [`Response`] from the supplied [`Bytes`].
    ///
    /// The error describes why the payload is not a GraphQL response envelope.
    pub fn from_bytes(b: Bytes) -> Result<Response, String> {
        let value = Value::from_bytes(b).map_err(|error| error.to_string())?;
        let mut object = ensure_object!(value)?;

        let data = extract_key_value_from_object!(object, "data");
        let errors = extract_key_value_from_object!(object, "errors", Value::Array(v) => v)?
            .into_iter()
            .flatten()
            .map(Error::from_value)
            .collect::<Result<Vec<Error>, String>>()?;
        let extensions =
            extract_key_value_from_object!(object, "extensions", Value::Object(o) => o)?
                .unwrap_or_default();

        // Graphql spec says:
        // If the data entry in the response is not present, the errors entry in the response must not be empty.
        // It must contain at least one error. The errors it contains should indicate why no data was able to be returned.
        if data.is_none() && errors.is_empty() {
            return Err(
                "graphql response without data must contain at least one error".to_string(),
            );
        }

        Ok(Response {
            data,
            errors,
            extensions,
        })
    }
}
