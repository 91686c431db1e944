//! Connection pools and the hyper-backed implementation
//!
//! This module provides:
//! - The [`ConnectionManager`] trait the raw client sends through
//! - One pooled hyper client per registered scheme
//! - Forceful shutdown that aborts in-flight requests and drops every
//!   pooled connection

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::factory::HyperPoolFactory;
use super::scheme::{Scheme, SchemeRegistry, SocketFactory, TcpOptions};

/// Error types for connection pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Failed to construct connection pool: {0}")]
    Construction(String),

    #[error("Connection pool has been shut down")]
    Shutdown,

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<hyper_util::client::legacy::Error> for PoolError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        // The legacy error only says "client error (Connect)"; the cause is in the source
        let message = match std::error::Error::source(&err) {
            Some(source) => format!("{}: {}", err, source),
            None => err.to_string(),
        };
        if err.is_connect() {
            PoolError::ConnectionFailed(message)
        } else {
            PoolError::Transport(message)
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

/// A pool of transport connections, shaped by a [`SchemeRegistry`]
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// The schemes this pool can reach (its shape descriptor)
    fn scheme_registry(&self) -> &SchemeRegistry;

    /// Send a request with an absolute URI and collect the full response
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;

    /// Close every connection. Requests in flight fail with [`PoolError::Shutdown`].
    fn shutdown(&self);

    fn is_shut_down(&self) -> bool;
}

/// Configuration for pool behavior that is not part of its shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum idle time before closing a pooled connection
    pub idle_timeout: Duration,

    /// Maximum idle connections kept per host
    pub max_idle_per_host: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 1024,
        }
    }
}

/// Statistics for a connection pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Requests handed to the transport
    pub requests_sent: u64,

    /// Requests that failed in the transport
    pub requests_failed: u64,

    /// Requests aborted because the pool was shut down under them
    pub aborted_by_shutdown: u64,
}

#[derive(Default)]
struct Counters {
    requests_sent: AtomicU64,
    requests_failed: AtomicU64,
    aborted_by_shutdown: AtomicU64,
}

/// Pooled hyper client bound to one scheme's socket factory
#[derive(Clone)]
enum SchemeClient {
    Plain(HyperClient<HttpConnector, Full<Bytes>>),
    Tls(HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>),
}

impl SchemeClient {
    fn build(scheme: &Scheme, config: &PoolConfig) -> Result<Self> {
        let http = http_connector(scheme.socket_factory().tcp_options());

        match scheme.socket_factory() {
            SocketFactory::Plain(_) => Ok(SchemeClient::Plain(client_builder(config).build(http))),
            SocketFactory::Tls {
                accept_invalid_certs,
                ..
            } => {
                let tls = if *accept_invalid_certs {
                    warn!(
                        scheme = %scheme.name(),
                        "INSECURE TLS: certificate verification is disabled"
                    );
                    TlsConnector::builder()
                        .danger_accept_invalid_certs(true)
                        .danger_accept_invalid_hostnames(true)
                        .build()
                } else {
                    TlsConnector::new()
                }
                .map_err(|e| {
                    PoolError::Construction(format!(
                        "TLS connector for scheme '{}': {}",
                        scheme.name(),
                        e
                    ))
                })?;

                let https = HttpsConnector::from((http, tls.into()));
                Ok(SchemeClient::Tls(client_builder(config).build(https)))
            }
        }
    }

    async fn request(&self, request: Request<Full<Bytes>>) -> Result<Response<Incoming>> {
        let response = match self {
            SchemeClient::Plain(client) => client.request(request).await?,
            SchemeClient::Tls(client) => client.request(request).await?,
        };
        Ok(response)
    }
}

fn http_connector(tcp: &TcpOptions) -> HttpConnector {
    let mut http = HttpConnector::new();
    http.set_nodelay(tcp.nodelay);
    http.set_keepalive(tcp.keepalive);
    http.set_connect_timeout(tcp.connect_timeout);
    // Scheme checks happen against the registry, not in the connector
    http.enforce_http(false);
    http
}

fn client_builder(config: &PoolConfig) -> hyper_util::client::legacy::Builder {
    let mut builder = HyperClient::builder(TokioExecutor::new());
    builder
        .pool_idle_timeout(config.idle_timeout)
        .pool_max_idle_per_host(config.max_idle_per_host)
        .set_host(true);
    builder
}

/// Connection pool backed by hyper-util's pooled client
///
/// Each registered scheme gets its own pooled client built from the scheme's
/// socket factory. Shutting down drops every client, which closes idle
/// connections, and signals in-flight requests to abort.
pub struct HyperConnectionManager {
    registry: SchemeRegistry,
    config: PoolConfig,
    clients: RwLock<Option<HashMap<String, SchemeClient>>>,
    shutdown: watch::Sender<bool>,
    counters: Counters,
}

impl HyperConnectionManager {
    /// Build a pool for every scheme in `registry`
    pub fn new(registry: SchemeRegistry, config: PoolConfig) -> Result<Self> {
        if registry.is_empty() {
            return Err(PoolError::Construction(
                "scheme registry is empty".to_string(),
            ));
        }

        let mut clients = HashMap::with_capacity(registry.len());
        for scheme in registry.iter() {
            clients.insert(scheme.name().to_string(), SchemeClient::build(scheme, &config)?);
        }

        debug!(
            schemes = ?registry.names(),
            idle_timeout_secs = config.idle_timeout.as_secs(),
            max_idle_per_host = config.max_idle_per_host,
            "Created connection pool"
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            registry,
            config,
            clients: RwLock::new(Some(clients)),
            shutdown,
            counters: Counters::default(),
        })
    }

    /// Pool with the default `http`/`https` registry
    pub fn with_defaults(config: PoolConfig) -> Result<Self> {
        Self::new(SchemeRegistry::with_defaults(), config)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Factory that rebuilds pools with this pool's configuration
    pub fn factory(&self) -> HyperPoolFactory {
        HyperPoolFactory::new(self.config.clone())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            requests_sent: self.counters.requests_sent.load(Ordering::Relaxed),
            requests_failed: self.counters.requests_failed.load(Ordering::Relaxed),
            aborted_by_shutdown: self.counters.aborted_by_shutdown.load(Ordering::Relaxed),
        }
    }

    fn client_for(&self, scheme: &str) -> Result<SchemeClient> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        let clients = clients.as_ref().ok_or(PoolError::Shutdown)?;
        clients
            .get(scheme)
            .cloned()
            .ok_or_else(|| PoolError::UnsupportedScheme(scheme.to_string()))
    }
}

impl std::fmt::Debug for HyperConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperConnectionManager")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionManager for HyperConnectionManager {
    fn scheme_registry(&self) -> &SchemeRegistry {
        &self.registry
    }

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let scheme = request
            .uri()
            .scheme_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| PoolError::UnsupportedScheme("<none>".to_string()))?;

        let client = self.client_for(&scheme)?;

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(PoolError::Shutdown);
        }

        let (parts, body) = request.into_parts();
        let request = Request::from_parts(parts, Full::new(body));
        self.counters.requests_sent.fetch_add(1, Ordering::Relaxed);

        let exchange = async move {
            let response = client.request(request).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, PoolError>(Response::from_parts(parts, body))
        };

        tokio::select! {
            result = exchange => {
                if result.is_err() {
                    self.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
                }
                result
            }
            _ = async { let _ = shutdown.wait_for(|down| *down).await; } => {
                self.counters.aborted_by_shutdown.fetch_add(1, Ordering::Relaxed);
                debug!(scheme = %scheme, "Request aborted by pool shutdown");
                Err(PoolError::Shutdown)
            }
        }
    }

    fn shutdown(&self) {
        let was_down = self.shutdown.send_replace(true);
        let dropped = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if !was_down {
            info!(
                schemes = ?self.registry.names(),
                clients = dropped.map(|c| c.len()).unwrap_or(0),
                "Connection pool shut down"
            );
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
