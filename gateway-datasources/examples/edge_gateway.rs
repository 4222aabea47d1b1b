//! Data sources suited to an edge runtime: single-shot fetch transport,
//! persisted queries, and a custom header on every subgraph request.
//!
//! ```sh
//! ACCOUNTS_URL=http://localhost:4001/graphql cargo run --example edge_gateway
//! ```

use std::sync::Arc;

use anyhow::Result;
use gateway_datasources::CallbackHooks;
use gateway_datasources::FetchTransport;
use gateway_datasources::GraphQLDataSource;
use gateway_datasources::RemoteDataSource;
use gateway_datasources::RequestContext;
use gateway_datasources::SubgraphRequest;
use gateway_datasources::SubgraphServiceFactory;
use http::HeaderValue;
use tracing_subscriber::EnvFilter;

const SUBGRAPHS: [(&str, &str, &str); 2] = [
    (
        "accounts",
        "ACCOUNTS_URL",
        "https://accounts.example.com/graphql",
    ),
    (
        "products",
        "PRODUCTS_URL",
        "https://products.example.com/graphql",
    ),
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let hooks = Arc::new(CallbackHooks::new().will_send_request(|request, _context| {
        request
            .headers
            .insert("x-custom-header", HeaderValue::from_static("value"));
        Ok(())
    }));

    let mut factory = SubgraphServiceFactory::new();
    for (name, variable, default_url) in SUBGRAPHS {
        let url = std::env::var(variable).unwrap_or_else(|_| default_url.to_string());
        let data_source = RemoteDataSource::new(
            name,
            url.parse()?,
            Arc::new(FetchTransport::builder().build()?),
        )
        .with_apq(true)
        .with_hooks(hooks.clone());
        factory.insert(name, Arc::new(data_source));
    }

    let accounts = factory
        .create("accounts")
        .ok_or_else(|| anyhow::anyhow!("accounts is not configured"))?;
    match accounts
        .process(
            SubgraphRequest::builder()
                .query("query Me { me { id name } }")
                .operation_name("Me")
                .build(),
            RequestContext::new(),
        )
        .await
    {
        Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome.response)?),
        Err(error) => println!("{}", serde_json::to_string_pretty(&error.to_response())?),
    }

    factory.shutdown().await;
    Ok(())
}
