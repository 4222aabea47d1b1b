//! Sub-operations sent to a subgraph over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::Uri;
use tracing::Instrument;

use super::http::get_uri_details;
use super::http::HttpRequest;
use super::http::RequestBody;
use super::http::Transport;
use super::ExecutionOutcome;
use super::GraphQLDataSource;
use super::SubgraphRequest;
use crate::apq::calculate_hash_for_query;
use crate::apq::check_persisted_query;
use crate::apq::get_apq_error;
use crate::apq::ApqError;
use crate::apq::ApqState;
use crate::error::FetchError;
use crate::graphql;
use crate::hooks::DataSourceHooks;
use crate::hooks::NoopHooks;
use crate::RequestContext;

const WILL_SEND_REQUEST: &str = "will_send_request";

/// A data source for a subgraph reached over HTTP.
///
/// Each dispatch negotiates automatic persisted queries when enabled, runs
/// the hooks around every network attempt and hands requests to the
/// [`Transport`] it was built with.
#[derive(Clone)]
pub struct RemoteDataSource {
    service_name: Arc<String>,
    uri: Uri,
    transport: Arc<dyn Transport>,
    hooks: Arc<dyn DataSourceHooks>,
    apq: bool,
}

impl RemoteDataSource {
    pub fn new(service_name: impl Into<String>, uri: Uri, transport: Arc<dyn Transport>) -> Self {
        Self {
            service_name: Arc::new(service_name.into()),
            uri,
            transport,
            hooks: Arc::new(NoopHooks),
            apq: false,
        }
    }

    /// Sends the hash of the document first, and the document itself only
    /// when the subgraph does not know it.
    pub fn with_apq(mut self, apq: bool) -> Self {
        self.apq = apq;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn DataSourceHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn dispatch(&self, request: SubgraphRequest, context: &RequestContext) -> ExecutionOutcome {
        let SubgraphRequest {
            query,
            operation_name,
            variables,
            extensions,
        } = request;
        let hash = calculate_hash_for_query(&query);
        let mut state = ApqState::start(self.apq);

        loop {
            let body = state.request(
                &query,
                &hash,
                operation_name.clone(),
                variables.clone(),
                extensions.clone(),
            );
            let outcome = self
                .attempt(
                    HttpRequest::graphql(self.uri.clone(), body),
                    state,
                    operation_name.as_deref().unwrap_or_default(),
                    context,
                )
                .await;

            let signal = match &outcome {
                Ok(response) => get_apq_error(&response.response),
                Err(_) => ApqError::Other,
            };
            match state.transition(signal) {
                Some(next) => {
                    tracing::debug!(
                        apollo.subgraph.name = %self.service_name,
                        ?signal,
                        "persisted query miss, sending the full query"
                    );
                    state = next;
                }
                None => return outcome,
            }
        }
    }

    /// One network attempt, from `will_send_request` to the hook handling its result.
    async fn attempt(
        &self,
        mut request: HttpRequest,
        state: ApqState,
        operation_name: &str,
        context: &RequestContext,
    ) -> ExecutionOutcome {
        let service_name = self.service_name.as_str();

        if let Err(error) = self.hooks.will_send_request(&mut request, context).await {
            let error = FetchError::SubrequestHookError {
                hook: WILL_SEND_REQUEST,
                service: service_name.to_string(),
                reason: error.to_string(),
            };
            return self
                .hooks
                .did_encounter_error(error, &request, context)
                .await;
        }

        // the transport sends these exact bytes
        match self.encode(&request.body, state) {
            Ok(bytes) => request.body = RequestBody::Bytes(bytes),
            Err(error) => {
                return self
                    .hooks
                    .did_encounter_error(error, &request, context)
                    .await
            }
        }

        let (host, port, path) = get_uri_details(&request.uri);
        let subgraph_req_span = tracing::info_span!("subgraph_request",
            "otel.kind" = "CLIENT",
            "net.peer.name" = %host,
            "net.peer.port" = %port,
            "http.route" = %path,
            "http.url" = %request.uri,
            "net.transport" = "ip_tcp",
            "apollo.subgraph.name" = %service_name,
            "graphql.operation.name" = %operation_name,
            "apq.includes_query" = state.includes_query(),
        );

        match self
            .transport
            .send(request.clone())
            .instrument(subgraph_req_span)
            .await
        {
            Ok(response) => {
                self.hooks
                    .did_receive_response(service_name, response, &request, context)
                    .await
            }
            Err(err) => {
                tracing::error!(
                    fetch_error = ?err,
                    apollo.subgraph.name = %service_name,
                    "subgraph request failed"
                );
                self.hooks
                    .did_encounter_error(err.into_fetch_error(service_name), &request, context)
                    .await
            }
        }
    }

    /// Serializes `body` once the hooks ran, checking it still is a GraphQL
    /// request with the persisted query fields `state` requires.
    fn encode(&self, body: &RequestBody, state: ApqState) -> Result<Bytes, FetchError> {
        let malformed = |reason: String| FetchError::MalformedRequest {
            service: self.service_name.to_string(),
            reason,
        };
        let bytes = body.to_bytes().map_err(|e| malformed(e.to_string()))?;
        let request: graphql::Request = serde_json::from_slice(&bytes)
            .map_err(|e| malformed(format!("the body is not a GraphQL request: {e}")))?;
        check_persisted_query(&request, state).map_err(|reason| {
            FetchError::SubrequestHookError {
                hook: WILL_SEND_REQUEST,
                service: self.service_name.to_string(),
                reason,
            }
        })?;
        Ok(bytes)
    }
}

#[async_trait]
impl GraphQLDataSource for RemoteDataSource {
    async fn process(&self, request: SubgraphRequest, context: RequestContext) -> ExecutionOutcome {
        let token = context.cancellation_token().clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(apollo.subgraph.name = %self.service_name, "subgraph request cancelled");
                Err(FetchError::SubrequestCancelled {
                    service: self.service_name.to_string(),
                })
            }
            outcome = self.dispatch(request, &context) => outcome,
        }
    }

    async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}
