//! Subgraph data sources for a federation gateway.
//!
//! A data source takes one planned sub-operation destined for a subgraph and
//! returns its outcome. Two families exist:
//!
//! * [`RemoteDataSource`] delivers the operation over HTTP through a
//!   [`Transport`], negotiating [Automatic Persisted Queries][apq] when enabled
//!   and running the caller's [`DataSourceHooks`] around every network attempt.
//! * [`LocalDataSource`] hands the operation to an in-process [`Executable`].
//!
//! Two transports ship with the crate: [`PoolingTransport`], built on a pooled
//! hyper client with connect retries and per-request timeouts, and
//! [`FetchTransport`], a single-shot client for runtimes that do not expose
//! socket control.
//!
//! [apq]: https://www.apollographql.com/docs/apollo-server/performance/apq/

#![warn(unreachable_pub)]

#[macro_use]
mod json_ext;

pub mod apq;
pub mod configuration;
mod context;
pub mod error;
pub mod graphql;
pub mod hooks;
pub mod services;

pub use crate::configuration::Configuration;
pub use crate::context::RequestContext;
pub use crate::error::FetchError;
pub use crate::error::NetworkError;
pub use crate::error::NetworkErrorKind;
pub use crate::hooks::CallbackHooks;
pub use crate::hooks::DataSourceHooks;
pub use crate::hooks::NoopHooks;
pub use crate::json_ext::Object;
pub use crate::services::http::FetchTransport;
pub use crate::services::http::HttpRequest;
pub use crate::services::http::HttpResponse;
pub use crate::services::http::PoolingTransport;
pub use crate::services::http::RequestBody;
pub use crate::services::http::Transport;
pub use crate::services::local::Executable;
pub use crate::services::local::LocalDataSource;
pub use crate::services::subgraph_service::RemoteDataSource;
pub use crate::services::ExecutionOutcome;
pub use crate::services::GraphQLDataSource;
pub use crate::services::SubgraphRequest;
pub use crate::services::SubgraphResponse;
pub use crate::services::SubgraphServiceFactory;
