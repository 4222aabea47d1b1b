//! Data sources and the types they exchange with the query planner.

use std::collections::HashMap;
use std::sync::Arc;

use ::http::HeaderMap;
use ::http::StatusCode;
use async_trait::async_trait;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::configuration::TransportKind;
use crate::error::FetchError;
use crate::graphql;
use crate::hooks::DataSourceHooks;
use crate::json_ext::Object;
use crate::RequestContext;

pub mod http;
pub mod local;
pub mod subgraph_service;

use self::http::FetchTransport;
use self::http::PoolingTransport;
use self::http::Transport;
use self::subgraph_service::RemoteDataSource;

/// The result of one dispatch: a GraphQL payload, or why there is none.
pub type ExecutionOutcome = Result<SubgraphResponse, FetchError>;

/// The sub-operation the query planner assigned to one subgraph.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct SubgraphRequest {
    /// The GraphQL document, sent byte for byte.
    pub query: String,

    pub operation_name: Option<String>,

    pub variables: Object,

    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl SubgraphRequest {
    #[builder(visibility = "pub")]
    fn new(
        query: String,
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

/// A GraphQL payload together with the HTTP status and headers it came with.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct SubgraphResponse {
    /// `None` when the operation was executed in-process.
    pub status: Option<StatusCode>,

    pub headers: HeaderMap,

    pub response: graphql::Response,
}

impl SubgraphResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, response: graphql::Response) -> Self {
        Self {
            status: Some(status),
            headers,
            response,
        }
    }

    /// A payload produced in-process, without HTTP status or headers.
    pub fn local(response: graphql::Response) -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            response,
        }
    }
}

/// Resolves the sub-operations destined to one subgraph.
///
/// Dispatches are independent: any number of them may run concurrently on
/// the same data source.
#[async_trait]
pub trait GraphQLDataSource: Send + Sync + 'static {
    async fn process(&self, request: SubgraphRequest, context: RequestContext) -> ExecutionOutcome;

    /// Releases the resources held by the data source once in-flight dispatches complete.
    async fn shutdown(&self) {}
}

/// The data sources of a gateway, by subgraph name.
#[derive(Clone, Default)]
pub struct SubgraphServiceFactory {
    services: HashMap<String, Arc<dyn GraphQLDataSource>>,
}

impl SubgraphServiceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// One remote data source per configured subgraph, with its transport and
    /// options, all sharing `hooks`.
    pub fn from_configuration(
        configuration: &Configuration,
        hooks: Arc<dyn DataSourceHooks>,
    ) -> Result<Self, ConfigurationError> {
        configuration.validate()?;

        let mut factory = Self::new();
        for name in configuration.subgraphs.keys() {
            let uri = match configuration.subgraph_url(name) {
                Some(uri) => uri?,
                None => continue,
            };
            let options = configuration.options(name);
            let transport: Arc<dyn Transport> = match options.transport {
                TransportKind::Pooling => Arc::new(PoolingTransport::from_options(options).map_err(
                    |e| ConfigurationError::InvalidConfiguration {
                        message: "could not create the pooling transport",
                        error: e.to_string(),
                    },
                )?),
                TransportKind::Fetch => Arc::new(FetchTransport::from_options(options).map_err(
                    |e| ConfigurationError::InvalidConfiguration {
                        message: "could not create the fetch transport",
                        error: e.to_string(),
                    },
                )?),
            };
            tracing::debug!(
                subgraph = %name,
                url = %uri,
                transport = ?options.transport,
                apq = options.apq,
                "creating data source"
            );
            factory.insert(
                name.clone(),
                Arc::new(
                    RemoteDataSource::new(name.clone(), uri, transport)
                        .with_apq(options.apq)
                        .with_hooks(hooks.clone()),
                ),
            );
        }
        Ok(factory)
    }

    /// Registers `data_source` for `name`, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, data_source: Arc<dyn GraphQLDataSource>) {
        self.services.insert(name.into(), data_source);
    }

    pub fn create(&self, name: &str) -> Option<Arc<dyn GraphQLDataSource>> {
        self.services.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Shuts every data source down, waiting for their in-flight dispatches.
    pub async fn shutdown(&self) {
        futures::future::join_all(self.services.values().map(|service| service.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use tower::BoxError;

    use super::*;
    use crate::hooks::NoopHooks;
    use crate::services::local::LocalDataSource;

    #[tokio::test(flavor = "multi_thread")]
    async fn factory_from_configuration() {
        let configuration: Configuration = r#"
subgraphs:
  accounts: http://localhost:4001/graphql
  products: http://localhost:4002/graphql
datasources:
  all:
    apq: true
  subgraphs:
    products:
      transport: fetch
"#
        .parse()
        .unwrap();

        let mut factory =
            SubgraphServiceFactory::from_configuration(&configuration, Arc::new(NoopHooks))
                .unwrap();
        let mut names: Vec<&str> = factory.names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["accounts", "products"]);
        assert!(factory.create("accounts").is_some());
        assert!(factory.create("reviews").is_none());

        factory.insert(
            "reviews",
            Arc::new(LocalDataSource::new(
                "reviews",
                Arc::new(|_request: graphql::Request, _context: RequestContext| async {
                    Ok::<_, BoxError>(
                        graphql::Response::builder()
                            .data(serde_json_bytes::json!({ "reviews": [] }))
                            .build(),
                    )
                }),
            )),
        );
        let outcome = factory
            .create("reviews")
            .unwrap()
            .process(
                SubgraphRequest::builder().query("{ reviews { id } }").build(),
                RequestContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, None);

        factory.shutdown().await;
    }

    #[test]
    fn subgraph_request_builder() {
        let request = SubgraphRequest::builder()
            .query("query Me { me { id } }")
            .operation_name("Me")
            .variable("first", 10)
            .extension("trace", true)
            .build();

        assert_eq!(request.operation_name.as_deref(), Some("Me"));
        assert_eq!(request.variables.get("first"), Some(&Value::from(10)));
        assert_eq!(request.extensions.get("trace"), Some(&Value::Bool(true)));
    }
}
