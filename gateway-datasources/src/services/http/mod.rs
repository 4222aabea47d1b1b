//! HTTP transports to subgraphs.

use std::error::Error as StdError;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::ACCEPT;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::Uri;

use crate::error::NetworkError;
use crate::graphql;

mod fetch;
mod pooled;

pub use self::fetch::FetchTransport;
pub use self::pooled::PoolingTransport;

pub(crate) static APPLICATION_JSON_HEADER_VALUE: HeaderValue =
    HeaderValue::from_static("application/json");
static ACCEPT_GRAPHQL_JSON: HeaderValue =
    HeaderValue::from_static("application/json, application/graphql-response+json");

/// Body of an [`HttpRequest`].
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// A GraphQL request, serialized as JSON when sent.
    Graphql(graphql::Request),
    /// Bytes sent as they are.
    Bytes(Bytes),
}

impl RequestBody {
    /// The bytes that go on the wire.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        match self {
            RequestBody::Graphql(request) => serde_json::to_vec(request).map(Bytes::from),
            RequestBody::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// The GraphQL request carried by the body.
    pub fn to_graphql(&self) -> Result<graphql::Request, serde_json::Error> {
        match self {
            RequestBody::Graphql(request) => Ok(request.clone()),
            RequestBody::Bytes(bytes) => serde_json::from_slice(bytes),
        }
    }
}

/// One request to a subgraph, built fresh for every attempt.
///
/// `will_send_request` hooks receive it mutably before it is handed to the
/// [`Transport`]. Header names are case-insensitive: `insert` replaces the
/// values of a header, `append` adds one.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl HttpRequest {
    /// A `POST` of `body` to `uri` with the default GraphQL over HTTP headers.
    pub fn graphql(uri: Uri, body: graphql::Request) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, APPLICATION_JSON_HEADER_VALUE.clone());
        headers.insert(ACCEPT, ACCEPT_GRAPHQL_JSON.clone());
        Self {
            method: Method::POST,
            uri,
            headers,
            body: RequestBody::Graphql(body),
        }
    }

    pub(crate) fn to_http(&self) -> Result<http::Request<Bytes>, NetworkError> {
        let body = self
            .body
            .to_bytes()
            .map_err(|e| NetworkError::invalid_request(e.to_string()))?;
        let mut request = http::Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone())
            .body(body)
            .map_err(|e| NetworkError::invalid_request(e.to_string()))?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

/// A complete response from a subgraph.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends one request and reads the whole response.
///
/// A response with any status code is a success: only failing to obtain a
/// complete response is a [`NetworkError`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError>;

    /// Stops accepting requests and waits for the in-flight ones.
    async fn shutdown(&self) {}
}

/// Host, port and path of `uri`, for tracing.
pub(crate) fn get_uri_details(uri: &Uri) -> (&str, u16, &str) {
    let port = uri.port_u16().unwrap_or_else(|| {
        let scheme = uri.scheme_str();
        if scheme == Some("https") {
            443
        } else if scheme == Some("http") {
            80
        } else {
            0
        }
    });

    (uri.host().unwrap_or_default(), port, uri.path())
}

/// `error` followed by its sources.
pub(crate) fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut reason = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    reason
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn graphql_request_defaults() {
        let request = HttpRequest::graphql(
            Uri::from_static("http://localhost:4001/graphql"),
            graphql::Request::builder()
                .query("{ me { id } }")
                .variable("id", json!(1))
                .build(),
        );

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");
        assert_eq!(
            request.headers[ACCEPT],
            "application/json, application/graphql-response+json"
        );

        let http_request = request.to_http().unwrap();
        assert_eq!(
            http_request.body(),
            &Bytes::from_static(br#"{"query":"{ me { id } }","variables":{"id":1}}"#)
        );
        assert_eq!(http_request.headers(), &request.headers);
    }

    #[test]
    fn raw_bytes_body_is_sent_as_is() {
        let body = RequestBody::Bytes(Bytes::from_static(br#"{"query": "{ me { id } }"}"#));
        assert_eq!(
            body.to_bytes().unwrap(),
            Bytes::from_static(br#"{"query": "{ me { id } }"}"#)
        );
        assert_eq!(
            body.to_graphql().unwrap().query.as_deref(),
            Some("{ me { id } }")
        );
    }

    #[test]
    fn uri_details_default_ports() {
        assert_eq!(
            get_uri_details(&Uri::from_static("https://products.example.com/graphql")),
            ("products.example.com", 443, "/graphql")
        );
        assert_eq!(
            get_uri_details(&Uri::from_static("http://127.0.0.1:4002/")),
            ("127.0.0.1", 4002, "/")
        );
    }

    #[test]
    fn error_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = NetworkError::connect(error_chain(&io));
        assert_eq!(error.to_string(), "connect error: refused");
    }
}
