use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;

use super::error_chain;
use super::HttpRequest;
use super::HttpResponse;
use super::Transport;
use crate::configuration::DataSourceOptions;
use crate::error::NetworkError;

/// A transport over a single-shot fetch primitive.
///
/// Built for runtimes that do not expose socket control: connection reuse is
/// left to the client, and a failed request is never tried again. Redirects
/// are not followed: a 3xx is handed back like any other response.
#[derive(Clone, Debug)]
pub struct FetchTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

#[buildstructor::buildstructor]
impl FetchTransport {
    #[builder(visibility = "pub")]
    fn new(
        client: Option<reqwest::Client>,
        timeout: Option<Duration>,
    ) -> Result<Self, NetworkError> {
        let client = match client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .redirect(Policy::none())
                .build()
                .map_err(|e| NetworkError::invalid_request(error_chain(&e)))?,
        };
        Ok(Self { client, timeout })
    }

    /// A fetch transport with the timeout of `options`; the other options have no effect on it.
    pub fn from_options(options: &DataSourceOptions) -> Result<Self, NetworkError> {
        Self::builder().timeout(options.timeout).build()
    }
}

#[async_trait]
impl Transport for FetchTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
        let body = request
            .body
            .to_bytes()
            .map_err(|e| NetworkError::invalid_request(e.to_string()))?;
        let mut builder = self
            .client
            .request(request.method, request.uri.to_string())
            .headers(request.headers)
            .body(body);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(into_network_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(into_network_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn into_network_error(err: reqwest::Error) -> NetworkError {
    let reason = error_chain(&err);
    if err.is_timeout() {
        NetworkError::timeout(reason)
    } else if err.is_connect() {
        NetworkError::connect(reason)
    } else if err.is_builder() {
        NetworkError::invalid_request(reason)
    } else {
        NetworkError::interrupted(reason)
    }
}
