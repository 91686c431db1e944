//! Per-client request decoration
//!
//! Authentication configures a raw client by editing its pipeline: default
//! headers are added to every request that lacks them, then interceptors
//! run in registration order.

use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Request;
use std::fmt;
use std::sync::Arc;

use super::error::Result;

/// Mutates an outgoing request just before it is sent
pub trait RequestInterceptor: Send + Sync {
    fn process(&self, request: &mut Request<Bytes>) -> Result<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[derive(Clone, Default)]
pub struct RequestPipeline {
    default_headers: HeaderMap,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl RequestPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header added to every request that does not already carry it
    pub fn insert_default_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.default_headers.insert(name, value);
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    pub fn add_interceptor(&mut self, interceptor: Arc<dyn RequestInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn interceptor_names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn apply(&self, request: &mut Request<Bytes>) -> Result<()> {
        let headers = request.headers_mut();
        for (name, value) in self.default_headers.iter() {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }

        for interceptor in &self.interceptors {
            interceptor.process(request)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("default_headers", &self.default_headers.keys().collect::<Vec<_>>())
            .field("interceptors", &self.interceptor_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{ACCEPT, USER_AGENT};

    struct Tag(&'static str);

    impl RequestInterceptor for Tag {
        fn process(&self, request: &mut Request<Bytes>) -> Result<()> {
            let value = match request.headers().get("x-tags") {
                Some(existing) => format!("{},{}", existing.to_str().unwrap_or(""), self.0),
                None => self.0.to_string(),
            };
            request
                .headers_mut()
                .insert("x-tags", HeaderValue::from_str(&value).unwrap());
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_default_headers_do_not_override() {
        let mut pipeline = RequestPipeline::new();
        pipeline.insert_default_header(ACCEPT, HeaderValue::from_static("*/*"));
        pipeline.insert_default_header(USER_AGENT, HeaderValue::from_static("pipeline"));

        let mut request = Request::get("http://localhost/")
            .header(USER_AGENT, "caller")
            .body(Bytes::new())
            .unwrap();
        pipeline.apply(&mut request).unwrap();

        assert_eq!(request.headers()[ACCEPT], "*/*");
        assert_eq!(request.headers()[USER_AGENT], "caller");
    }

    #[test]
    fn test_interceptors_run_in_order() {
        let mut pipeline = RequestPipeline::new();
        pipeline.add_interceptor(Arc::new(Tag("first")));
        pipeline.add_interceptor(Arc::new(Tag("second")));

        let mut request = Request::get("http://localhost/").body(Bytes::new()).unwrap();
        pipeline.apply(&mut request).unwrap();

        assert_eq!(request.headers()["x-tags"], "first,second");
        assert_eq!(pipeline.interceptor_names(), vec!["first", "second"]);
    }
}
