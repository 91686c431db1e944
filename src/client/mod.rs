//! HTTP clients
//!
//! This module provides:
//! - The [`HttpClient`] trait with its eight execution shapes
//! - A raw pooled client, a decompressing decorator over it, and the
//!   restartable facade that swaps both at runtime
//! - Target hosts, execution contexts and response handlers

pub mod decompress;
pub mod default;
pub mod error;
pub mod pipeline;
pub mod restartable;

pub use decompress::DecompressingHttpClient;
pub use default::DefaultHttpClient;
pub use error::{ClientError, Result};
pub use pipeline::{RequestInterceptor, RequestPipeline};
pub use restartable::{ActiveClient, RestartableHttpClient, RestartableHttpClientBuilder};

use async_trait::async_trait;
use bytes::Bytes;
use hyper::http::Extensions;
use hyper::{Request, Response, StatusCode, Uri};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::pool::ConnectionManager;

/// Transport parameters shared by every client a facade builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpParams {
    /// Upper bound on a whole exchange, connect through last body byte
    pub request_timeout: Duration,

    /// Sent when the request carries no User-Agent
    pub user_agent: String,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("restartable-http/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Explicit target of a request: scheme, host and optional port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpHost {
    scheme: String,
    hostname: String,
    port: Option<u16>,
}

impl HttpHost {
    pub fn new(scheme: impl Into<String>, hostname: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            hostname: hostname.into(),
            port,
        }
    }

    pub fn http(hostname: impl Into<String>, port: Option<u16>) -> Self {
        Self::new("http", hostname, port)
    }

    pub fn https(hostname: impl Into<String>, port: Option<u16>) -> Self {
        Self::new("https", hostname, port)
    }

    /// Target of an absolute URI, None for relative ones
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let scheme = uri.scheme_str()?;
        let host = uri.host()?;
        Some(Self::new(scheme, host, uri.port_u16()))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// `host:port` for a URI authority, bracketing bare IPv6 literals
    pub(crate) fn authority(&self, port: u16) -> String {
        if self.hostname.contains(':') && !self.hostname.starts_with('[') {
            format!("[{}]:{}", self.hostname, port)
        } else {
            format!("{}:{}", self.hostname, port)
        }
    }
}

impl fmt::Display for HttpHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.hostname, port),
            None => write!(f, "{}://{}", self.scheme, self.hostname),
        }
    }
}

/// State of a single execution, filled in by the client that runs it
#[derive(Debug, Default)]
pub struct HttpContext {
    target_host: Option<HttpHost>,
    request_sent: bool,
    status: Option<StatusCode>,
    elapsed: Option<Duration>,
    attributes: Extensions,
}

impl HttpContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved target, including the scheme's default port
    pub fn target_host(&self) -> Option<&HttpHost> {
        self.target_host.as_ref()
    }

    pub fn is_request_sent(&self) -> bool {
        self.request_sent
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Caller-defined values carried through the execution
    pub fn attributes(&self) -> &Extensions {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Extensions {
        &mut self.attributes
    }

    pub(crate) fn record_target(&mut self, target: HttpHost) {
        self.target_host = Some(target);
    }

    pub(crate) fn record_sent(&mut self) {
        self.request_sent = true;
    }

    pub(crate) fn record_response(&mut self, status: StatusCode, elapsed: Duration) {
        self.status = Some(status);
        self.elapsed = Some(elapsed);
    }
}

/// Turns a response into a caller-defined value
pub trait ResponseHandler<T>: Send + Sync {
    fn handle_response(&self, response: Response<Bytes>) -> Result<T>;
}

impl<T, F> ResponseHandler<T> for F
where
    F: Fn(Response<Bytes>) -> Result<T> + Send + Sync,
{
    fn handle_response(&self, response: Response<Bytes>) -> Result<T> {
        self(response)
    }
}

/// An HTTP client
///
/// Implementors provide [`HttpClient::send`]; the execution shapes are
/// built on it. Wrappers that need per-call behavior (the restartable
/// facade) override the shapes as well.
#[async_trait]
pub trait HttpClient: Send + Sync {
    type Manager: ConnectionManager;

    fn params(&self) -> Result<Arc<HttpParams>>;

    fn connection_manager(&self) -> Result<Arc<Self::Manager>>;

    /// Execute `request` against `target`, or against the request URI's
    /// own scheme and authority when no target is given
    async fn send(
        &self,
        target: Option<&HttpHost>,
        request: Request<Bytes>,
        context: &mut HttpContext,
    ) -> Result<Response<Bytes>>;

    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let mut context = HttpContext::new();
        self.send(None, request, &mut context).await
    }

    async fn execute_with_context(
        &self,
        request: Request<Bytes>,
        context: &mut HttpContext,
    ) -> Result<Response<Bytes>> {
        self.send(None, request, context).await
    }

    async fn execute_on(&self, target: &HttpHost, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let mut context = HttpContext::new();
        self.send(Some(target), request, &mut context).await
    }

    async fn execute_on_with_context(
        &self,
        target: &HttpHost,
        request: Request<Bytes>,
        context: &mut HttpContext,
    ) -> Result<Response<Bytes>> {
        self.send(Some(target), request, context).await
    }

    async fn execute_handled<T, H>(&self, request: Request<Bytes>, handler: H) -> Result<T>
    where
        T: Send,
        H: ResponseHandler<T>,
    {
        let response = self.execute(request).await?;
        handler.handle_response(response)
    }

    async fn execute_handled_with_context<T, H>(
        &self,
        request: Request<Bytes>,
        handler: H,
        context: &mut HttpContext,
    ) -> Result<T>
    where
        T: Send,
        H: ResponseHandler<T>,
    {
        let response = self.execute_with_context(request, context).await?;
        handler.handle_response(response)
    }

    async fn execute_on_handled<T, H>(
        &self,
        target: &HttpHost,
        request: Request<Bytes>,
        handler: H,
    ) -> Result<T>
    where
        T: Send,
        H: ResponseHandler<T>,
    {
        let response = self.execute_on(target, request).await?;
        handler.handle_response(response)
    }

    async fn execute_on_handled_with_context<T, H>(
        &self,
        target: &HttpHost,
        request: Request<Bytes>,
        handler: H,
        context: &mut HttpContext,
    ) -> Result<T>
    where
        T: Send,
        H: ResponseHandler<T>,
    {
        let response = self.execute_on_with_context(target, request, context).await?;
        handler.handle_response(response)
    }
}
