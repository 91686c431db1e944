//! Raw pooled client
//!
//! Resolves the target against the pool's scheme registry, applies the
//! request pipeline and sends through the pool under the request timeout.

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderValue, USER_AGENT};
use hyper::{Request, Response, Uri};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::error::{ClientError, Result};
use super::pipeline::RequestPipeline;
use super::{HttpClient, HttpContext, HttpHost, HttpParams};
use crate::pool::{ConnectionManager, PoolError};

pub struct DefaultHttpClient<M> {
    manager: Arc<M>,
    params: Arc<HttpParams>,
    pipeline: RequestPipeline,
}

impl<M: ConnectionManager> DefaultHttpClient<M> {
    pub fn new(manager: Arc<M>, params: Arc<HttpParams>) -> Self {
        Self {
            manager,
            params,
            pipeline: RequestPipeline::new(),
        }
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut RequestPipeline {
        &mut self.pipeline
    }

    pub fn manager(&self) -> &Arc<M> {
        &self.manager
    }

    /// Rewrite the request URI to absolute form against the resolved target
    fn route(&self, target: Option<&HttpHost>, request: &mut Request<Bytes>) -> Result<HttpHost> {
        let host = match target {
            Some(target) => target.clone(),
            None => HttpHost::from_uri(request.uri()).ok_or_else(|| {
                ClientError::InvalidRequest(format!(
                    "no target host given and request URI '{}' is not absolute",
                    request.uri()
                ))
            })?,
        };

        let scheme = self
            .manager
            .scheme_registry()
            .get(host.scheme())
            .ok_or_else(|| PoolError::UnsupportedScheme(host.scheme().to_string()))?;
        let port = scheme.resolve_port(host.port());

        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");

        let uri = Uri::builder()
            .scheme(scheme.name())
            .authority(host.authority(port))
            .path_and_query(path_and_query)
            .build()?;
        *request.uri_mut() = uri;

        Ok(HttpHost::new(scheme.name(), host.hostname(), Some(port)))
    }
}

#[async_trait]
impl<M: ConnectionManager> HttpClient for DefaultHttpClient<M> {
    type Manager = M;

    fn params(&self) -> Result<Arc<HttpParams>> {
        Ok(Arc::clone(&self.params))
    }

    fn connection_manager(&self) -> Result<Arc<M>> {
        Ok(Arc::clone(&self.manager))
    }

    async fn send(
        &self,
        target: Option<&HttpHost>,
        mut request: Request<Bytes>,
        context: &mut HttpContext,
    ) -> Result<Response<Bytes>> {
        let resolved = self.route(target, &mut request)?;
        context.record_target(resolved.clone());

        if !request.headers().contains_key(USER_AGENT) {
            let agent = HeaderValue::from_str(&self.params.user_agent).map_err(|e| {
                ClientError::InvalidRequest(format!("invalid user agent: {}", e))
            })?;
            request.headers_mut().insert(USER_AGENT, agent);
        }
        self.pipeline.apply(&mut request)?;

        let method = request.method().clone();
        let started = Instant::now();
        context.record_sent();

        let response = tokio::time::timeout(self.params.request_timeout, self.manager.send(request))
            .await
            .map_err(|_| ClientError::Timeout(self.params.request_timeout))??;

        let elapsed = started.elapsed();
        context.record_response(response.status(), elapsed);
        debug!(
            target = %resolved,
            method = %method,
            status = response.status().as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Scheme, SchemeRegistry};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Echo {
        registry: SchemeRegistry,
        seen: Mutex<Vec<Request<Bytes>>>,
        delay: Duration,
    }

    impl Echo {
        fn new(delay: Duration) -> Self {
            let mut registry = SchemeRegistry::new();
            registry.register(Scheme::plain("http", 8080));
            Self {
                registry,
                seen: Mutex::new(Vec::new()),
                delay,
            }
        }
    }

    #[async_trait]
    impl ConnectionManager for Echo {
        fn scheme_registry(&self) -> &SchemeRegistry {
            &self.registry
        }

        async fn send(&self, request: Request<Bytes>) -> crate::pool::connection::Result<Response<Bytes>> {
            tokio::time::sleep(self.delay).await;
            let body = Bytes::from(request.uri().to_string());
            self.seen.lock().unwrap().push(request);
            Ok(Response::new(body))
        }

        fn shutdown(&self) {}

        fn is_shut_down(&self) -> bool {
            false
        }
    }

    fn client(delay: Duration) -> DefaultHttpClient<Echo> {
        DefaultHttpClient::new(Arc::new(Echo::new(delay)), Arc::new(HttpParams::default()))
    }

    #[tokio::test]
    async fn test_relative_uri_uses_target_and_default_port() {
        let client = client(Duration::ZERO);
        let request = Request::get("/stream?track=rust").body(Bytes::new()).unwrap();
        let mut context = HttpContext::new();

        let response = client
            .execute_on_with_context(&HttpHost::http("localhost", None), request, &mut context)
            .await
            .unwrap();

        assert_eq!(response.body(), "http://localhost:8080/stream?track=rust");
        assert_eq!(context.target_host(), Some(&HttpHost::http("localhost", Some(8080))));
        assert!(context.is_request_sent());
        assert_eq!(context.status(), Some(hyper::StatusCode::OK));
    }

    #[tokio::test]
    async fn test_ipv6_target_is_bracketed() {
        let client = client(Duration::ZERO);

        let request = Request::get("/v6").body(Bytes::new()).unwrap();
        let response = client
            .execute_on(&HttpHost::http("::1", Some(9000)), request)
            .await
            .unwrap();
        assert_eq!(response.body(), "http://[::1]:9000/v6");

        let request = Request::get("http://[::1]/v6").body(Bytes::new()).unwrap();
        let response = client.execute(request).await.unwrap();
        assert_eq!(response.body(), "http://[::1]:8080/v6");
    }

    #[tokio::test]
    async fn test_relative_uri_without_target_is_rejected() {
        let client = client(Duration::ZERO);
        let request = Request::get("/stream").body(Bytes::new()).unwrap();

        let err = client.execute(request).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unregistered_scheme_is_rejected() {
        let client = client(Duration::ZERO);
        let request = Request::get("https://localhost/").body(Bytes::new()).unwrap();

        let err = client.execute(request).await.unwrap_err();
        assert!(matches!(err, ClientError::Pool(PoolError::UnsupportedScheme(s)) if s == "https"));
    }

    #[tokio::test]
    async fn test_user_agent_and_pipeline_applied() {
        let mut client = client(Duration::ZERO);
        client
            .pipeline_mut()
            .insert_default_header(hyper::header::ACCEPT, HeaderValue::from_static("application/json"));

        let request = Request::get("http://localhost/").body(Bytes::new()).unwrap();
        client.execute(request).await.unwrap();

        let seen = client.manager().seen.lock().unwrap();
        let headers = seen[0].headers();
        assert!(headers[USER_AGENT].to_str().unwrap().starts_with("restartable-http/"));
        assert_eq!(headers[hyper::header::ACCEPT], "application/json");
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let manager = Arc::new(Echo::new(Duration::from_secs(5)));
        let params = HttpParams {
            request_timeout: Duration::from_millis(20),
            ..HttpParams::default()
        };
        let client = DefaultHttpClient::new(manager, Arc::new(params));

        let request = Request::get("http://localhost/").body(Bytes::new()).unwrap();
        let err = client.execute(request).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_handler_receives_response() {
        let client = client(Duration::ZERO);
        let request = Request::get("http://localhost/len").body(Bytes::new()).unwrap();

        let len = client
            .execute_handled(request, |response: Response<Bytes>| -> Result<usize> {
                Ok(response.body().len())
            })
            .await
            .unwrap();
        assert_eq!(len, "http://localhost:8080/len".len());
    }
}
