//! Automatic persisted queries between the gateway and its subgraphs.
//!
//! The gateway first sends only the SHA-256 hash of the operation. A subgraph
//! that does not know the hash answers with `PERSISTED_QUERY_NOT_FOUND` and the
//! gateway sends the hash and the full document once more, so that the
//! subgraph can cache it for the next time.
//!
//! <https://www.apollographql.com/docs/apollo-server/performance/apq/>
use serde_json_bytes::json;
use sha2::Digest;
use sha2::Sha256;

use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;

pub const PERSISTED_QUERY_NOT_FOUND_EXTENSION_CODE: &str = "PERSISTED_QUERY_NOT_FOUND";
pub const PERSISTED_QUERY_NOT_SUPPORTED_EXTENSION_CODE: &str = "PERSISTED_QUERY_NOT_SUPPORTED";
pub const PERSISTED_QUERY_NOT_FOUND_MESSAGE: &str = "PersistedQueryNotFound";
pub const PERSISTED_QUERY_NOT_SUPPORTED_MESSAGE: &str = "PersistedQueryNotSupported";
const CODE_STRING: &str = "code";
pub(crate) const PERSISTED_QUERY_KEY: &str = "persistedQuery";
const QUERY_KEY: &str = "query";
const HASH_VERSION_KEY: &str = "version";
const HASH_VERSION_VALUE: i32 = 1;
pub(crate) const HASH_KEY: &str = "sha256Hash";

/// Lowercase hex SHA-256 digest of the exact document text.
pub fn calculate_hash_for_query(query: &str) -> String {
    hex::encode(Sha256::digest(query.as_bytes()))
}

/// The value of the `persistedQuery` request extension for `hash`.
pub fn persisted_query_extension(hash: &str) -> Value {
    json!({
        HASH_VERSION_KEY: HASH_VERSION_VALUE,
        HASH_KEY: hash,
    })
}

/// The wire fragment `{ "persistedQuery": {..}, "query"?: .. }` for one attempt.
pub fn encode_extension(hash: &str, include_query: bool, query: &str) -> Object {
    let mut fragment = Object::new();
    fragment.insert(PERSISTED_QUERY_KEY, persisted_query_extension(hash));
    if include_query {
        fragment.insert(QUERY_KEY, query.into());
    }
    fragment
}

/// APQ signal found in a subgraph response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApqError {
    PersistedQueryNotSupported,
    PersistedQueryNotFound,
    Other,
}

/// Looks for an APQ signal in the errors of `gql_response`, by message or by `extensions.code`.
pub fn get_apq_error(gql_response: &graphql::Response) -> ApqError {
    for error in &gql_response.errors {
        // Check if error message is an APQ error
        match error.message.as_str() {
            PERSISTED_QUERY_NOT_FOUND_MESSAGE => {
                return ApqError::PersistedQueryNotFound;
            }
            PERSISTED_QUERY_NOT_SUPPORTED_MESSAGE => {
                return ApqError::PersistedQueryNotSupported;
            }
            _ => {}
        }
        // Check if extensions contains the APQ error in "code"
        if let Some(value) = error.extensions.get(CODE_STRING) {
            if value == PERSISTED_QUERY_NOT_FOUND_EXTENSION_CODE {
                return ApqError::PersistedQueryNotFound;
            } else if value == PERSISTED_QUERY_NOT_SUPPORTED_EXTENSION_CODE {
                return ApqError::PersistedQueryNotSupported;
            }
        }
    }
    ApqError::Other
}

/// Where one dispatch stands in the persisted query negotiation.
///
/// The state only lives for the duration of a single dispatch: whether the
/// subgraph cached the document is never remembered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApqState {
    NotAttempted,
    /// The hash was sent without the document.
    HashOnly,
    /// The hash was sent with the document. Every outcome from here is final.
    FullQuerySent,
}

impl ApqState {
    /// The state of the first attempt.
    ///
    /// Without APQ the document goes out with its hash right away and no
    /// negotiation takes place.
    pub fn start(apq_enabled: bool) -> Self {
        if apq_enabled {
            ApqState::HashOnly
        } else {
            ApqState::FullQuerySent
        }
    }

    /// The state of the next attempt, or `None` when the last response is final.
    pub fn transition(self, signal: ApqError) -> Option<Self> {
        match (self, signal) {
            (
                ApqState::HashOnly,
                ApqError::PersistedQueryNotFound | ApqError::PersistedQueryNotSupported,
            ) => Some(ApqState::FullQuerySent),
            (ApqState::NotAttempted, _) => Some(ApqState::HashOnly),
            (ApqState::HashOnly, ApqError::Other) | (ApqState::FullQuerySent, _) => None,
        }
    }

    /// Whether the request of this state carries the document text.
    pub fn includes_query(self) -> bool {
        matches!(self, ApqState::FullQuerySent)
    }

    /// Builds the wire request of this state for `query` and its `hash`.
    pub(crate) fn request(
        self,
        query: &str,
        hash: &str,
        operation_name: Option<String>,
        variables: Object,
        mut extensions: Object,
    ) -> graphql::Request {
        extensions.insert(PERSISTED_QUERY_KEY, persisted_query_extension(hash));
        graphql::Request::builder()
            .and_query(self.includes_query().then(|| query.to_string()))
            .and_operation_name(operation_name)
            .variables(variables)
            .extensions(extensions)
            .build()
    }
}

/// Checks that `request` still carries the protocol fields `state` requires.
pub(crate) fn check_persisted_query(
    request: &graphql::Request,
    state: ApqState,
) -> Result<(), String> {
    let persisted_query = request
        .extensions
        .get(PERSISTED_QUERY_KEY)
        .ok_or_else(|| format!("the `{PERSISTED_QUERY_KEY}` extension was removed"))?;
    match persisted_query.get(HASH_KEY) {
        Some(Value::String(hash)) if !hash.as_str().is_empty() => {}
        _ => {
            return Err(format!(
                "the `{PERSISTED_QUERY_KEY}.{HASH_KEY}` extension was removed"
            ))
        }
    }
    if state.includes_query() && request.query.is_none() {
        return Err("the query was removed from a request that must carry it".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            calculate_hash_for_query("{ me { name } }"),
            "b8d9506e34c83b0e53c2aa463624fcea354713bc38f95276e6f0bd893ffb5b88"
        );
        assert_eq!(
            calculate_hash_for_query("query { topProducts { name } }"),
            "2e329c62bf54b8c5c1781af74e05b40e85bcdb4f2a576e93685a0a183a7e7c58"
        );
        assert_eq!(
            calculate_hash_for_query(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let document = "query Me($id: ID!) { user(id: $id) { name reviews { body } } }";
        let first = calculate_hash_for_query(document);
        for _ in 0..100 {
            assert_eq!(calculate_hash_for_query(document), first);
        }
        assert_eq!(first.len(), 64);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn near_identical_documents_do_not_collide() {
        let document = "query { topProducts(first: 5) { upc name price } }";
        let mut corpus = vec![document.to_string()];
        for (position, _) in document.char_indices() {
            let mut changed = document.to_string();
            changed.replace_range(position..position + 1, "x");
            if changed != document {
                corpus.push(changed);
            }
            let mut inserted = document.to_string();
            inserted.insert(position, ' ');
            corpus.push(inserted);
        }
        corpus.push(format!("{document} "));
        corpus.push(format!("{document}\n"));

        let distinct_documents: HashSet<&String> = corpus.iter().collect();
        let hashes: HashSet<String> = corpus
            .iter()
            .map(|document| calculate_hash_for_query(document))
            .collect();
        assert_eq!(hashes.len(), distinct_documents.len());
    }

    #[test]
    fn encode_extension_fragment() {
        let hash = calculate_hash_for_query("{ me { name } }");

        assert_eq!(
            Value::Object(encode_extension(&hash, false, "{ me { name } }")),
            json!({
                "persistedQuery": {
                    "version": 1,
                    "sha256Hash": "b8d9506e34c83b0e53c2aa463624fcea354713bc38f95276e6f0bd893ffb5b88"
                }
            })
        );
        assert_eq!(
            Value::Object(encode_extension(&hash, true, "{ me { name } }")),
            json!({
                "persistedQuery": {
                    "version": 1,
                    "sha256Hash": "b8d9506e34c83b0e53c2aa463624fcea354713bc38f95276e6f0bd893ffb5b88"
                },
                "query": "{ me { name } }"
            })
        );
    }

    #[test]
    fn apq_error_from_message_or_code() {
        let by_message = graphql::Response::builder()
            .error(
                graphql::Error::builder()
                    .message(PERSISTED_QUERY_NOT_FOUND_MESSAGE)
                    .build(),
            )
            .build();
        assert_eq!(get_apq_error(&by_message), ApqError::PersistedQueryNotFound);

        let by_code = graphql::Response::builder()
            .error(
                graphql::Error::builder()
                    .message("unsupported")
                    .extension_code(PERSISTED_QUERY_NOT_SUPPORTED_EXTENSION_CODE)
                    .build(),
            )
            .build();
        assert_eq!(
            get_apq_error(&by_code),
            ApqError::PersistedQueryNotSupported
        );

        let unrelated = graphql::Response::builder()
            .data(json!({ "me": null }))
            .error(
                graphql::Error::builder()
                    .message("Cannot return null for non-nullable field")
                    .extension_code("INTERNAL_SERVER_ERROR")
                    .build(),
            )
            .build();
        assert_eq!(get_apq_error(&unrelated), ApqError::Other);
        assert_eq!(
            get_apq_error(&graphql::Response::default()),
            ApqError::Other
        );
    }

    #[test]
    fn at_most_one_full_query_attempt() {
        assert_eq!(ApqState::start(true), ApqState::HashOnly);
        assert_eq!(ApqState::start(false), ApqState::FullQuerySent);
        assert_eq!(
            ApqState::NotAttempted.transition(ApqError::Other),
            Some(ApqState::HashOnly)
        );

        assert_eq!(
            ApqState::HashOnly.transition(ApqError::PersistedQueryNotFound),
            Some(ApqState::FullQuerySent)
        );
        assert_eq!(
            ApqState::HashOnly.transition(ApqError::PersistedQueryNotSupported),
            Some(ApqState::FullQuerySent)
        );
        assert_eq!(ApqState::HashOnly.transition(ApqError::Other), None);

        for signal in [
            ApqError::PersistedQueryNotFound,
            ApqError::PersistedQueryNotSupported,
            ApqError::Other,
        ] {
            assert_eq!(ApqState::FullQuerySent.transition(signal), None);
        }
    }

    #[test]
    fn request_per_state() {
        let query = "{ me { name } }";
        let hash = calculate_hash_for_query(query);

        let hash_only =
            ApqState::HashOnly.request(query, &hash, None, Object::new(), Object::new());
        assert!(hash_only.query.is_none());
        assert_eq!(
            hash_only.extensions.get(PERSISTED_QUERY_KEY),
            Some(&persisted_query_extension(&hash))
        );
        check_persisted_query(&hash_only, ApqState::HashOnly).unwrap();

        let full = ApqState::FullQuerySent.request(
            query,
            &hash,
            Some("Me".to_string()),
            Object::new(),
            Object::new(),
        );
        assert_eq!(full.query.as_deref(), Some(query));
        assert_eq!(full.operation_name.as_deref(), Some("Me"));
        check_persisted_query(&full, ApqState::FullQuerySent).unwrap();
    }

    #[test]
    fn removed_protocol_fields_are_rejected() {
        let query = "{ me { name } }";
        let hash = calculate_hash_for_query(query);

        let mut request =
            ApqState::FullQuerySent.request(query, &hash, None, Object::new(), Object::new());
        request.query = None;
        assert_eq!(
            check_persisted_query(&request, ApqState::FullQuerySent).unwrap_err(),
            "the query was removed from a request that must carry it"
        );

        let mut request =
            ApqState::HashOnly.request(query, &hash, None, Object::new(), Object::new());
        request
            .extensions
            .insert(PERSISTED_QUERY_KEY, json!({ "version": 1 }));
        assert_eq!(
            check_persisted_query(&request, ApqState::HashOnly).unwrap_err(),
            "the `persistedQuery.sha256Hash` extension was removed"
        );

        request.extensions.remove(PERSISTED_QUERY_KEY);
        assert_eq!(
            check_persisted_query(&request, ApqState::HashOnly).unwrap_err(),
            "the `persistedQuery` extension was removed"
        );
    }
}
