use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future;
use futures::future::BoxFuture;
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioTimer;
use rustls::ClientConfig;
use rustls::RootCertStore;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tower::retry::Policy;
use tower::retry::Retry;
use tower::Service;
use tower::ServiceExt;

use super::error_chain;
use super::HttpRequest;
use super::HttpResponse;
use super::Transport;
use crate::configuration::DataSourceOptions;
use crate::configuration::DEFAULT_MAX_CONNECTIONS;
use crate::configuration::DEFAULT_TIMEOUT;
use crate::error::NetworkError;

type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

const POOL_IDLE_TIMEOUT_DURATION: Option<Duration> = Some(Duration::from_secs(5));

/// A transport over a pool of keep-alive connections, keyed by origin.
///
/// At most `max_connections` requests are in flight to one origin at a time,
/// and as many idle connections are kept per origin. Each attempt is bounded
/// by `timeout`, covering the connection, the response head and the response
/// body. A request that could not connect is tried again up to `retry_count`
/// times; once a connection is established a failure is final, so a mutation
/// is never sent twice.
pub struct PoolingTransport {
    // `None` once shut down
    http_client: parking_lot::Mutex<Option<HttpClient>>,
    // one entry per origin ever sent to, never evicted: origins come from the
    // configured subgraph urls, so the map stays as small as that list
    limits: DashMap<String, Arc<Semaphore>>,
    in_flight: TaskTracker,
    max_connections: usize,
    retry_count: usize,
    timeout: Duration,
}

#[buildstructor::buildstructor]
impl PoolingTransport {
    #[builder(visibility = "pub")]
    fn new(
        max_connections: Option<usize>,
        retry_count: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<Self, NetworkError> {
        let max_connections = max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS).max(1);

        let mut http_connector = HttpConnector::new();
        http_connector.set_nodelay(true);
        http_connector.set_keepalive(Some(Duration::from_secs(60)));
        http_connector.enforce_http(false);

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(generate_tls_client_config(native_roots_store())?)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http_connector);

        let http_client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT_DURATION)
            .pool_max_idle_per_host(max_connections)
            .pool_timer(TokioTimer::new())
            .build(connector);

        Ok(Self {
            http_client: parking_lot::Mutex::new(Some(http_client)),
            limits: DashMap::new(),
            in_flight: TaskTracker::new(),
            max_connections,
            retry_count: retry_count.unwrap_or_default(),
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }

    pub fn from_options(options: &DataSourceOptions) -> Result<Self, NetworkError> {
        Self::builder()
            .max_connections(options.max_connections)
            .retry_count(options.retry_count)
            .timeout(options.timeout)
            .build()
    }

    fn limit(&self, origin: String) -> Arc<Semaphore> {
        self.limits
            .entry(origin)
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_connections)))
            .value()
            .clone()
    }
}

#[async_trait]
impl Transport for PoolingTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
        // tracked before the client is taken, so that `shutdown` waits for
        // every send that could still observe the pool
        self.in_flight
            .track_future(async move {
                let http_client = self
                    .http_client
                    .lock()
                    .clone()
                    .ok_or_else(NetworkError::closed)?;
                let origin = match (request.uri.scheme_str(), request.uri.authority()) {
                    (Some(scheme), Some(authority)) => format!("{scheme}://{authority}"),
                    _ => {
                        return Err(NetworkError::invalid_request(format!(
                            "cannot send a request to '{}': the url must be absolute",
                            request.uri
                        )))
                    }
                };
                let limit = self.limit(origin);
                let client = PooledClient {
                    http_client,
                    timeout: self.timeout,
                };
                let policy = RetryPolicy::new(self.retry_count);

                let _permit = limit
                    .acquire_owned()
                    .await
                    .map_err(|_| NetworkError::closed())?;
                Retry::new(policy, client).oneshot(request).await
            })
            .await
    }

    async fn shutdown(&self) {
        self.in_flight.close();
        // in-flight requests keep their own handle on the pool, which is
        // released when the last of them completes
        let _ = self.http_client.lock().take();
        self.in_flight.wait().await;
        for limit in self.limits.iter() {
            limit.value().close();
        }
        tracing::debug!("pooling transport shut down");
    }
}

/// One attempt over the pooled client.
#[derive(Clone)]
struct PooledClient {
    http_client: HttpClient,
    timeout: Duration,
}

impl Service<HttpRequest> for PooledClient {
    type Response = HttpResponse;
    type Error = NetworkError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: HttpRequest) -> Self::Future {
        let http_client = self.http_client.clone();
        let timeout = self.timeout;
        Box::pin(async move {
            let http_request = request.to_http()?.map(Full::new);
            let exchange = async move {
                let response = http_client.request(http_request).await.map_err(|err| {
                    let reason = error_chain(&err);
                    if err.is_connect() {
                        NetworkError::connect(reason)
                    } else {
                        NetworkError::interrupted(reason)
                    }
                })?;
                let (parts, body) = response.into_parts();
                let body = body
                    .collect()
                    .await
                    .map_err(|err| NetworkError::interrupted(error_chain(&err)))?
                    .to_bytes();
                Ok::<_, NetworkError>(HttpResponse {
                    status: parts.status,
                    headers: parts.headers,
                    body,
                })
            };

            tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| NetworkError::timeout(format!("request timed out after {timeout:?}")))?
        })
    }
}

/// Retries attempts that failed to connect, `remaining` more times at most.
#[derive(Clone, Debug)]
pub(crate) struct RetryPolicy {
    remaining: usize,
}

impl RetryPolicy {
    pub(crate) fn new(retry_count: usize) -> Self {
        Self {
            remaining: retry_count,
        }
    }
}

impl<Res> Policy<HttpRequest, Res, NetworkError> for RetryPolicy {
    type Future = future::Ready<Self>;

    fn retry(
        &self,
        req: &HttpRequest,
        result: Result<&Res, &NetworkError>,
    ) -> Option<Self::Future> {
        match result {
            Err(error) if error.is_retryable() && self.remaining > 0 => {
                tracing::debug!(
                    url = %req.uri,
                    remaining = self.remaining,
                    "retrying request after connect failure: {error}"
                );
                Some(future::ready(Self {
                    remaining: self.remaining - 1,
                }))
            }
            _ => None,
        }
    }

    fn clone_request(&self, req: &HttpRequest) -> Option<HttpRequest> {
        Some(req.clone())
    }
}

fn native_roots_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let mut valid_count = 0;
    let mut invalid_count = 0;

    let native_certs = rustls_native_certs::load_native_certs();
    for error in &native_certs.errors {
        tracing::debug!("could not load platform certs: {error}");
    }
    for cert in native_certs.certs {
        match roots.add(cert) {
            Ok(_) => valid_count += 1,
            Err(err) => {
                tracing::debug!("certificate parsing failed: {:?}", err);
                invalid_count += 1
            }
        }
    }
    tracing::debug!(
        "with_native_roots processed {} valid and {} invalid certs",
        valid_count,
        invalid_count
    );
    roots
}

fn generate_tls_client_config(tls_cert_store: RootCertStore) -> Result<ClientConfig, NetworkError> {
    let tls_builder =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| NetworkError::invalid_request(e.to_string()))?;
    Ok(tls_builder
        .with_root_certificates(tls_cert_store)
        .with_no_client_auth())
}
