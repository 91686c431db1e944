//! Restartable client facade
//!
//! The decompressing decorator cannot reliably abort in-flight requests. The
//! workaround is to throw away the whole client together with its connection
//! pool and build a fresh pair. [`RestartableHttpClient`] is the stable handle
//! callers keep while that happens underneath.
//!
//! Readers load the current [`ActiveClient`] from an `ArcSwapOption` exactly
//! once per call and run the whole call against that snapshot. `setup` and
//! `restart` are the only writers and are serialized by a mutex that readers
//! never touch.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::{Request, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

use super::decompress::DecompressingHttpClient;
use super::default::DefaultHttpClient;
use super::error::{ClientError, Result};
use super::{HttpClient, HttpContext, HttpHost, HttpParams, ResponseHandler};
use crate::auth::Authentication;
use crate::config::Config;
use crate::pool::{
    ConnectionManager, HyperConnectionManager, HyperPoolFactory, PoolError, PoolFactory,
};

enum Chain<M> {
    Plain(DefaultHttpClient<M>),
    Decompressing(DecompressingHttpClient<DefaultHttpClient<M>>),
}

/// One fully configured client, published into the facade by `setup`
///
/// Never mutated after publication; a later `setup` or `restart`
/// supersedes it with a new instance.
pub struct ActiveClient<M> {
    generation: u64,
    chain: Chain<M>,
}

impl<M: ConnectionManager> ActiveClient<M> {
    /// 1 for the first setup, incremented by every setup after it
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_decompressing(&self) -> bool {
        matches!(self.chain, Chain::Decompressing(_))
    }

    /// The raw client under any decorators
    pub fn raw(&self) -> &DefaultHttpClient<M> {
        match &self.chain {
            Chain::Plain(client) => client,
            Chain::Decompressing(client) => client.inner(),
        }
    }

    pub fn manager(&self) -> &Arc<M> {
        self.raw().manager()
    }
}

#[async_trait]
impl<M: ConnectionManager> HttpClient for ActiveClient<M> {
    type Manager = M;

    fn params(&self) -> Result<Arc<HttpParams>> {
        self.raw().params()
    }

    fn connection_manager(&self) -> Result<Arc<M>> {
        Ok(Arc::clone(self.manager()))
    }

    async fn send(
        &self,
        target: Option<&HttpHost>,
        request: Request<Bytes>,
        context: &mut HttpContext,
    ) -> Result<Response<Bytes>> {
        match &self.chain {
            Chain::Plain(client) => client.send(target, request, context).await,
            Chain::Decompressing(client) => client.send(target, request, context).await,
        }
    }
}

/// Stable client handle whose underlying client and pool can be rebuilt
///
/// Starts Unready; [`setup`](Self::setup) publishes the first client.
/// Requests issued while Unready fail with [`ClientError::NotReady`].
pub struct RestartableHttpClient<M = HyperConnectionManager, F = HyperPoolFactory> {
    underlying: ArcSwapOption<ActiveClient<M>>,
    auth: Arc<dyn Authentication>,
    params: Arc<HttpParams>,
    enable_gzip: bool,
    factory: F,
    /// Pool the next setup builds on; also the writer lock
    connection_manager: Mutex<Arc<M>>,
    generation: AtomicU64,
    restarts: AtomicU64,
}

impl<M, F> RestartableHttpClient<M, F>
where
    M: ConnectionManager,
    F: PoolFactory<M>,
{
    pub fn new(
        auth: Arc<dyn Authentication>,
        enable_gzip: bool,
        params: HttpParams,
        connection_manager: M,
        factory: F,
    ) -> Self {
        Self {
            underlying: ArcSwapOption::empty(),
            auth,
            params: Arc::new(params),
            enable_gzip,
            factory,
            connection_manager: Mutex::new(Arc::new(connection_manager)),
            generation: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        }
    }

    pub fn builder() -> RestartableHttpClientBuilder<M, F> {
        RestartableHttpClientBuilder::default()
    }

    /// Build a client on the current pool and publish it
    pub fn setup(&self) {
        let manager = self
            .connection_manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.publish(&manager);
    }

    /// Retire the current client and its pool, then publish a rebuilt pair
    ///
    /// In-flight requests on the old pool are aborted. If the factory cannot
    /// rebuild the pool, the retired client stays in the slot (its requests
    /// fail with [`PoolError::Shutdown`]) until a later restart succeeds.
    ///
    /// Called before the first `setup`, there is nothing to retire and this
    /// behaves like `setup` on the initial pool.
    pub fn restart(&self) -> std::result::Result<(), PoolError> {
        debug!("Restarting");
        let mut manager = self
            .connection_manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match self.underlying.load_full() {
            Some(old) => {
                // Kills every connection of the old client and releases its resources
                old.manager().shutdown();
                *manager = Arc::new(self.rebuild(old.manager().as_ref())?);
            }
            None => debug!("Restart requested before setup; nothing to tear down"),
        }

        self.publish(&manager);
        self.restarts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rebuild(&self, old: &M) -> std::result::Result<M, PoolError> {
        debug!(schemes = ?old.scheme_registry().names(), "Rebuilding connection manager");
        self.factory.create(old.scheme_registry()).map_err(|e| {
            error!(error = %e, "Failed to rebuild connection manager");
            match e {
                PoolError::Construction(msg) => PoolError::Construction(msg),
                other => PoolError::Construction(other.to_string()),
            }
        })
    }

    fn publish(&self, manager: &Arc<M>) {
        let mut raw = DefaultHttpClient::new(Arc::clone(manager), Arc::clone(&self.params));
        self.auth.setup_connection(raw.pipeline_mut());

        let chain = if self.enable_gzip {
            Chain::Decompressing(DecompressingHttpClient::new(raw))
        } else {
            Chain::Plain(raw)
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.underlying.store(Some(Arc::new(ActiveClient { generation, chain })));

        info!(
            generation = generation,
            gzip = self.enable_gzip,
            schemes = ?manager.scheme_registry().names(),
            "Client ready"
        );
    }

    /// Snapshot of the client requests are currently routed to
    pub fn current(&self) -> Result<Arc<ActiveClient<M>>> {
        self.underlying.load_full().ok_or(ClientError::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.underlying.load().is_some()
    }

    /// Generation of the published client, 0 while Unready
    pub fn generation(&self) -> u64 {
        self.underlying
            .load()
            .as_ref()
            .map(|client| client.generation())
            .unwrap_or(0)
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn is_gzip_enabled(&self) -> bool {
        self.enable_gzip
    }
}

impl RestartableHttpClient<HyperConnectionManager, HyperPoolFactory> {
    /// Compose a hyper-backed facade from configuration. Does not call `setup`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let manager = HyperConnectionManager::new(config.scheme_registry(), config.pool_config())?;
        let factory = manager.factory();

        Ok(Self::new(
            config.authentication()?,
            config.client.gzip,
            config.http_params(),
            manager,
            factory,
        ))
    }
}

#[async_trait]
impl<M, F> HttpClient for RestartableHttpClient<M, F>
where
    M: ConnectionManager,
    F: PoolFactory<M>,
{
    type Manager = M;

    fn params(&self) -> Result<Arc<HttpParams>> {
        self.current()?.params()
    }

    fn connection_manager(&self) -> Result<Arc<M>> {
        self.current()?.connection_manager()
    }

    async fn send(
        &self,
        target: Option<&HttpHost>,
        request: Request<Bytes>,
        context: &mut HttpContext,
    ) -> Result<Response<Bytes>> {
        self.current()?.send(target, request, context).await
    }

    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        self.current()?.execute(request).await
    }

    async fn execute_with_context(
        &self,
        request: Request<Bytes>,
        context: &mut HttpContext,
    ) -> Result<Response<Bytes>> {
        self.current()?.execute_with_context(request, context).await
    }

    async fn execute_on(&self, target: &HttpHost, request: Request<Bytes>) -> Result<Response<Bytes>> {
        self.current()?.execute_on(target, request).await
    }

    async fn execute_on_with_context(
        &self,
        target: &HttpHost,
        request: Request<Bytes>,
        context: &mut HttpContext,
    ) -> Result<Response<Bytes>> {
        self.current()?
            .execute_on_with_context(target, request, context)
            .await
    }

    async fn execute_handled<T, H>(&self, request: Request<Bytes>, handler: H) -> Result<T>
    where
        T: Send,
        H: ResponseHandler<T>,
    {
        self.current()?.execute_handled(request, handler).await
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
        self.current()?
            .execute_handled_with_context(request, handler, context)
            .await
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
        self.current()?
            .execute_on_handled(target, request, handler)
            .await
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
        self.current()?
            .execute_on_handled_with_context(target, request, handler, context)
            .await
    }
}

/// Builder that checks every required component is present
pub struct RestartableHttpClientBuilder<M = HyperConnectionManager, F = HyperPoolFactory> {
    auth: Option<Arc<dyn Authentication>>,
    enable_gzip: bool,
    params: Option<HttpParams>,
    connection_manager: Option<M>,
    factory: Option<F>,
}

impl<M, F> Default for RestartableHttpClientBuilder<M, F> {
    fn default() -> Self {
        Self {
            auth: None,
            enable_gzip: false,
            params: None,
            connection_manager: None,
            factory: None,
        }
    }
}

impl<M, F> RestartableHttpClientBuilder<M, F>
where
    M: ConnectionManager,
    F: PoolFactory<M>,
{
    pub fn authentication(mut self, auth: Arc<dyn Authentication>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn gzip(mut self, enable: bool) -> Self {
        self.enable_gzip = enable;
        self
    }

    pub fn params(mut self, params: HttpParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn connection_manager(mut self, manager: M) -> Self {
        self.connection_manager = Some(manager);
        self
    }

    pub fn pool_factory(mut self, factory: F) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<RestartableHttpClient<M, F>> {
        let auth = self.auth.ok_or(ClientError::MissingComponent("authentication"))?;
        let params = self.params.ok_or(ClientError::MissingComponent("params"))?;
        let manager = self
            .connection_manager
            .ok_or(ClientError::MissingComponent("connection manager"))?;
        let factory = self.factory.ok_or(ClientError::MissingComponent("pool factory"))?;

        Ok(RestartableHttpClient::new(auth, self.enable_gzip, params, manager, factory))
    }
}
