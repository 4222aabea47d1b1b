use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::json_ext::Object;

/// A GraphQL `Request` as it travels on the wire to a subgraph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Request {
    /// The GraphQL operation (e.g., query, mutation) string.
    ///
    /// Absent when the operation is identified only by its persisted query hash.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,

    /// The (optional) GraphQL operation name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_name: Option<String>,

    /// The (optional) GraphQL variables in the form of a JSON object.
    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "deserialize_null_default"
    )]
    pub variables: Object,

    /// The (optional) GraphQL `extensions` of a GraphQL request.
    ///
    /// Automatic persisted queries are negotiated through the `persistedQuery`
    /// key of this object:
    ///
    /// ```json
    /// {
    ///   "extensions": {
    ///     "persistedQuery": {
    ///       "version": 1,
    ///       "sha256Hash": "sha256HashOfQuery"
    ///     }
    ///   }
    /// }
    /// ```
    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "deserialize_null_default"
    )]
    pub extensions: Object,
}

// NOTE: this deserialize helper is used to transform `null` to Default::default()
fn deserialize_null_default<'de, D, T: Default + Deserialize<'de>>(
    deserializer: D,
) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Option<T>>::deserialize(deserializer).map(|x| x.unwrap_or_default())
}

#[buildstructor::buildstructor]
impl Request {
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor’s map special-casing
        variables: JsonMap<ByteString, Value>,
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables,
            extensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn serializes_without_empty_members() {
        let request = Request::builder()
            .extension("persistedQuery", json!({ "version": 1, "sha256Hash": "abc" }))
            .build();

        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"extensions":{"persistedQuery":{"version":1,"sha256Hash":"abc"}}}"#
        );
    }

    #[test]
    fn null_variables_deserialize_to_empty() {
        let request: Request = serde_json::from_str(
            r#"{"query":"{ me { id } }","operationName":null,"variables":null}"#,
        )
        .unwrap();

        assert_eq!(request.query.as_deref(), Some("{ me { id } }"));
        assert!(request.operation_name.is_none());
        assert!(request.variables.is_empty());
    }
}
