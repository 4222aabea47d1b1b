//! Interception points around every request a remote data source sends.
//!
//! Implement [`DataSourceHooks`] to add authorization headers, record
//! telemetry or post-process responses. Every method has a default, so an
//! implementation only overrides what it needs. [`CallbackHooks`] offers the
//! same extension points as plain closures.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use tower::BoxError;

use crate::error::FetchError;
use crate::graphql;
use crate::services::http::HttpRequest;
use crate::services::http::HttpResponse;
use crate::services::ExecutionOutcome;
use crate::services::SubgraphResponse;
use crate::RequestContext;

const GRAPHQL_RESPONSE: &str = "graphql-response";

/// Hooks run by a remote data source around each network attempt.
///
/// With automatic persisted queries a dispatch may take two attempts, and the
/// hooks run for both.
#[async_trait]
pub trait DataSourceHooks: Send + Sync + 'static {
    /// Runs before every network attempt.
    ///
    /// Mutating `request` is the only sanctioned way to alter what is sent,
    /// typically to add authorization headers taken from the `context`. The
    /// default headers are already set: `insert` replaces one, `append` adds a
    /// value. Removing the persisted query fields the attempt needs is an
    /// error. An error aborts the dispatch before anything is sent.
    async fn will_send_request(
        &self,
        _request: &mut HttpRequest,
        _context: &RequestContext,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs after every complete HTTP exchange, whatever the status code.
    ///
    /// Defaults to [`parse_response`]. The returned outcome is final, and it
    /// is the one inspected for persisted query signals.
    async fn did_receive_response(
        &self,
        service_name: &str,
        response: HttpResponse,
        _request: &HttpRequest,
        _context: &RequestContext,
    ) -> ExecutionOutcome {
        parse_response(service_name, response)
    }

    /// Runs when an attempt fails without a response: network failures,
    /// `will_send_request` failures and request bodies that could not be encoded.
    ///
    /// Defaults to returning the error. Returning a payload recovers the dispatch.
    async fn did_encounter_error(
        &self,
        error: FetchError,
        _request: &HttpRequest,
        _context: &RequestContext,
    ) -> ExecutionOutcome {
        Err(error)
    }
}

/// Hooks that keep every default behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl DataSourceHooks for NoopHooks {}

type WillSendRequest =
    dyn Fn(&mut HttpRequest, &RequestContext) -> Result<(), BoxError> + Send + Sync;
type DidReceiveResponse =
    dyn Fn(&str, HttpResponse, &HttpRequest, &RequestContext) -> ExecutionOutcome + Send + Sync;
type DidEncounterError =
    dyn Fn(FetchError, &HttpRequest, &RequestContext) -> ExecutionOutcome + Send + Sync;

/// [`DataSourceHooks`] made of closures. A hook left unset keeps its default behavior.
///
/// ```ignore
/// let hooks = CallbackHooks::new().will_send_request(|request, _context| {
///     request
///         .headers
///         .insert("x-custom-header", HeaderValue::from_static("value"));
///     Ok(())
/// });
/// ```
#[derive(Clone, Default)]
pub struct CallbackHooks {
    will_send_request: Option<Arc<WillSendRequest>>,
    did_receive_response: Option<Arc<DidReceiveResponse>>,
    did_encounter_error: Option<Arc<DidEncounterError>>,
}

impl CallbackHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn will_send_request<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut HttpRequest, &RequestContext) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.will_send_request = Some(Arc::new(callback));
        self
    }

    pub fn did_receive_response<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, HttpResponse, &HttpRequest, &RequestContext) -> ExecutionOutcome
            + Send
            + Sync
            + 'static,
    {
        self.did_receive_response = Some(Arc::new(callback));
        self
    }

    pub fn did_encounter_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(FetchError, &HttpRequest, &RequestContext) -> ExecutionOutcome
            + Send
            + Sync
            + 'static,
    {
        self.did_encounter_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for CallbackHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHooks")
            .field("will_send_request", &self.will_send_request.is_some())
            .field("did_receive_response", &self.did_receive_response.is_some())
            .field("did_encounter_error", &self.did_encounter_error.is_some())
            .finish()
    }
}

#[async_trait]
impl DataSourceHooks for CallbackHooks {
    async fn will_send_request(
        &self,
        request: &mut HttpRequest,
        context: &RequestContext,
    ) -> Result<(), BoxError> {
        match &self.will_send_request {
            Some(callback) => callback(request, context),
            None => Ok(()),
        }
    }

    async fn did_receive_response(
        &self,
        service_name: &str,
        response: HttpResponse,
        request: &HttpRequest,
        context: &RequestContext,
    ) -> ExecutionOutcome {
        match &self.did_receive_response {
            Some(callback) => callback(service_name, response, request, context),
            None => parse_response(service_name, response),
        }
    }

    async fn did_encounter_error(
        &self,
        error: FetchError,
        request: &HttpRequest,
        context: &RequestContext,
    ) -> ExecutionOutcome {
        match &self.did_encounter_error {
            Some(callback) => callback(error, request, context),
            None => Err(error),
        }
    }
}

/// Parses the body of `response` as a GraphQL response envelope.
///
/// The status code does not matter: a 5xx carrying a well formed envelope is
/// a payload, and its `errors` are passed through. A body that is not an
/// envelope is a [`FetchError::SubrequestMalformedResponse`].
pub fn parse_response(service_name: &str, response: HttpResponse) -> ExecutionOutcome {
    let HttpResponse {
        status,
        headers,
        body,
    } = response;

    if !is_graphql_content_type(headers.get(CONTENT_TYPE)) {
        tracing::warn!(
            apollo.subgraph.name = %service_name,
            http.status = %status,
            content_type = ?headers.get(CONTENT_TYPE),
            "subgraph did not answer with content-type application/json or application/graphql-response+json"
        );
    }

    tracing::debug_span!("parse_subgraph_response").in_scope(|| {
        match graphql::Response::from_bytes(body) {
            Ok(graphql_response) => Ok(SubgraphResponse::new(status, headers, graphql_response)),
            Err(reason) => {
                tracing::debug!(
                    apollo.subgraph.name = %service_name,
                    http.status = %status,
                    "malformed subgraph response: {reason}"
                );
                Err(FetchError::SubrequestMalformedResponse {
                    status_code: Some(status.as_u16()),
                    service: service_name.to_string(),
                    reason,
                })
            }
        }
    })
}

fn is_graphql_content_type(content_type: Option<&http::HeaderValue>) -> bool {
    content_type
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .map(|content_type| {
            content_type.type_() == mime::APPLICATION
                && (content_type.subtype() == mime::JSON
                    || (content_type.subtype() == GRAPHQL_RESPONSE
                        && content_type.suffix() == Some(mime::JSON)))
        })
        .unwrap_or(false)
}
