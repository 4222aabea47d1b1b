//! In-process execution of sub-operations.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tower::BoxError;
use tracing::Instrument;

use super::ExecutionOutcome;
use super::GraphQLDataSource;
use super::SubgraphRequest;
use super::SubgraphResponse;
use crate::error::FetchError;
use crate::graphql;
use crate::RequestContext;

/// Executes a GraphQL request against a schema living in the same process.
#[async_trait]
pub trait Executable: Send + Sync + 'static {
    async fn execute(
        &self,
        request: graphql::Request,
        context: RequestContext,
    ) -> Result<graphql::Response, BoxError>;
}

#[async_trait]
impl<F, Fut> Executable for F
where
    F: Fn(graphql::Request, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<graphql::Response, BoxError>> + Send,
{
    async fn execute(
        &self,
        request: graphql::Request,
        context: RequestContext,
    ) -> Result<graphql::Response, BoxError> {
        (self)(request, context).await
    }
}

/// A data source for a subgraph colocated with the gateway.
///
/// No HTTP request exists, so there is no transport, no persisted query
/// negotiation and no hook.
#[derive(Clone)]
pub struct LocalDataSource {
    service_name: Arc<String>,
    executable: Arc<dyn Executable>,
}

impl LocalDataSource {
    pub fn new(service_name: impl Into<String>, executable: Arc<dyn Executable>) -> Self {
        Self {
            service_name: Arc::new(service_name.into()),
            executable,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

#[async_trait]
impl GraphQLDataSource for LocalDataSource {
    async fn process(&self, request: SubgraphRequest, context: RequestContext) -> ExecutionOutcome {
        let service_name = self.service_name.as_str();
        let SubgraphRequest {
            query,
            operation_name,
            variables,
            extensions,
        } = request;
        let operation = operation_name.clone().unwrap_or_default();
        let graphql_request = graphql::Request::builder()
            .query(query)
            .and_operation_name(operation_name)
            .variables(variables)
            .extensions(extensions)
            .build();

        let token = context.cancellation_token().clone();
        let execution = self
            .executable
            .execute(graphql_request, context)
            .instrument(tracing::info_span!(
                "local_subgraph_request",
                "apollo.subgraph.name" = %service_name,
                "graphql.operation.name" = %operation,
            ));

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(apollo.subgraph.name = %service_name, "local execution cancelled");
                Err(FetchError::SubrequestCancelled {
                    service: service_name.to_string(),
                })
            }
            result = execution => result
                .map(SubgraphResponse::local)
                .map_err(|error| FetchError::LocalExecution {
                    service: service_name.to_string(),
                    reason: error.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json_bytes::json;

    use super::*;

    struct Echo;

    #[async_trait]
    impl Executable for Echo {
        async fn execute(
            &self,
            request: graphql::Request,
            context: RequestContext,
        ) -> Result<graphql::Response, BoxError> {
            let user: Option<String> = context.get("user")?;
            Ok(graphql::Response::builder()
                .data(json!({
                    "query": request.query,
                    "operationName": request.operation_name,
                    "variables": request.variables,
                    "user": user,
                }))
                .build())
        }
    }

    #[tokio::test]
    async fn executes_in_process() {
        let data_source = LocalDataSource::new("accounts", Arc::new(Echo));
        let context = RequestContext::new();
        context.insert("user", "ada".to_string()).unwrap();

        let outcome = data_source
            .process(
                SubgraphRequest::builder()
                    .query("query Me { me { id } }")
                    .operation_name("Me")
                    .variable("id", 1)
                    .build(),
                context,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, None);
        assert!(outcome.headers.is_empty());
        assert_eq!(
            outcome.response.data,
            Some(json!({
                "query": "query Me { me { id } }",
                "operationName": "Me",
                "variables": { "id": 1 },
                "user": "ada",
            }))
        );
    }

    #[tokio::test]
    async fn graphql_errors_are_a_payload() {
        let data_source = LocalDataSource::new(
            "accounts",
            Arc::new(|_request: graphql::Request, _context: RequestContext| async {
                Ok::<_, BoxError>(
                    graphql::Response::builder()
                        .error(graphql::Error::builder().message("not allowed").build())
                        .build(),
                )
            }),
        );

        let outcome = data_source
            .process(
                SubgraphRequest::builder().query("{ me { id } }").build(),
                RequestContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.response.errors[0].message, "not allowed");
    }

    #[tokio::test]
    async fn execution_failure() {
        let data_source = LocalDataSource::new(
            "accounts",
            Arc::new(|_request: graphql::Request, _context: RequestContext| async {
                Err::<graphql::Response, BoxError>("schema is not loaded".into())
            }),
        );

        let error = data_source
            .process(
                SubgraphRequest::builder().query("{ me { id } }").build(),
                RequestContext::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            error,
            FetchError::LocalExecution {
                service: "accounts".to_string(),
                reason: "schema is not loaded".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn cancellation() {
        let data_source = LocalDataSource::new(
            "accounts",
            Arc::new(|_request: graphql::Request, _context: RequestContext| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, BoxError>(graphql::Response::default())
            }),
        );
        let context = RequestContext::new();
        let canceller = context.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let error = tokio::time::timeout(
            Duration::from_secs(5),
            data_source.process(
                SubgraphRequest::builder().query("{ me { id } }").build(),
                context,
            ),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(
            error,
            FetchError::SubrequestCancelled {
                service: "accounts".to_string(),
            }
        );
    }
}
