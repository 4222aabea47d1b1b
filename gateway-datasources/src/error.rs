//! Data source errors.
use displaydoc::Display;
use serde_json_bytes::json;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;
use crate::graphql;
use crate::json_ext::Object;

/// Why a subgraph dispatch failed.
///
/// GraphQL errors returned by a subgraph are not failures: they travel in the
/// `errors` of the response payload. A `FetchError` means no usable payload exists.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FetchError {
    /// HTTP fetch failed from '{service}': {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    SubrequestHttpError {
        /// The kind of network failure.
        kind: NetworkErrorKind,

        /// The service failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The HTTP status of the malformed response, when one was received.
        status_code: Option<u16>,

        /// The service that responded with the malformed response.
        service: String,

        /// The reason the deserialization failed.
        reason: String,
    },

    /// hook '{hook}' failed for service '{service}': {reason}
    SubrequestHookError {
        /// The hook that failed.
        hook: &'static str,

        /// The service the request was meant for.
        service: String,

        /// The error reported by the hook.
        reason: String,
    },

    /// request to '{service}' was cancelled
    SubrequestCancelled {
        /// The service the request was meant for.
        service: String,
    },

    /// in-process execution failed for '{service}': {reason}
    LocalExecution {
        /// The service executed in-process.
        service: String,

        /// The reason the execution failed.
        reason: String,
    },

    /// request to '{service}' could not be encoded: {reason}
    MalformedRequest {
        /// The service the request was meant for.
        service: String,

        /// The reason the body is not a GraphQL request.
        reason: String,
    },
}

impl FetchError {
    /// The `extensions.code` used when this error is reported as a GraphQL error.
    pub fn extension_code(&self) -> &'static str {
        match self {
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::SubrequestHookError { .. } => "SUBREQUEST_HOOK_ERROR",
            FetchError::SubrequestCancelled { .. } => "SUBREQUEST_CANCELLED",
            FetchError::LocalExecution { .. } => "LOCAL_EXECUTION_ERROR",
            FetchError::MalformedRequest { .. } => "MALFORMED_REQUEST",
        }
    }

    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self) -> graphql::Error {
        let mut extensions = Object::new();
        extensions.insert("code", self.extension_code().into());
        // Following these specs https://www.apollographql.com/docs/apollo-server/data/errors/#including-custom-error-details
        match self {
            FetchError::SubrequestHttpError { service, kind, .. } => {
                extensions.insert("service", service.as_str().into());
                extensions.insert("reason", kind.to_string().into());
            }
            FetchError::SubrequestMalformedResponse {
                service,
                status_code,
                ..
            } => {
                extensions.insert("service", service.as_str().into());
                if let Some(status_code) = status_code {
                    extensions.insert("http", json!({ "status": status_code }));
                }
            }
            FetchError::SubrequestHookError { service, hook, .. } => {
                extensions.insert("service", service.as_str().into());
                extensions.insert("hook", (*hook).into());
            }
            FetchError::SubrequestCancelled { service }
            | FetchError::LocalExecution { service, .. }
            | FetchError::MalformedRequest { service, .. } => {
                extensions.insert("service", service.as_str().into());
            }
        }

        graphql::Error::builder()
            .message(self.to_string())
            .extensions(extensions)
            .build()
    }

    /// Convert the error to a GraphQL response carrying it as its only error.
    pub fn to_response(&self) -> graphql::Response {
        graphql::Response::builder()
            .error(self.to_graphql_error())
            .build()
    }
}

/// The class of a transport failure.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    /// connect
    Connect,
    /// timeout
    Timeout,
    /// interrupted
    Interrupted,
    /// closed
    Closed,
    /// invalid request
    InvalidRequest,
}

/// A transport failure: the exchange with the subgraph did not produce a complete HTTP response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {reason}")]
pub struct NetworkError {
    /// The class of the failure.
    pub kind: NetworkErrorKind,
    /// What happened.
    pub reason: String,
}

impl NetworkError {
    pub fn new(kind: NetworkErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// No connection could be established, so nothing was sent to the subgraph.
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::new(NetworkErrorKind::Connect, reason)
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::new(NetworkErrorKind::Timeout, reason)
    }

    /// The exchange started and broke off before a complete response was read.
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self::new(NetworkErrorKind::Interrupted, reason)
    }

    pub fn closed() -> Self {
        Self::new(NetworkErrorKind::Closed, "the transport has been shut down")
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::new(NetworkErrorKind::InvalidRequest, reason)
    }

    /// Whether sending the same request again cannot duplicate side effects.
    pub fn is_retryable(&self) -> bool {
        self.kind == NetworkErrorKind::Connect
    }

    pub(crate) fn into_fetch_error(self, service: &str) -> FetchError {
        FetchError::SubrequestHttpError {
            kind: self.kind,
            service: service.to_string(),
            reason: self.reason,
        }
    }
}
