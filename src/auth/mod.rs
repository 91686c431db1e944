//! Authentication capabilities
//!
//! An [`Authentication`] configures a freshly built raw client by editing its
//! request pipeline. The facade keeps one for its whole lifetime and applies
//! it again to every client it builds, so applying it must give the same
//! result each time.

pub mod sigv4;

pub use sigv4::{SigV4Authentication, SigV4Signer};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::header::{HeaderValue, AUTHORIZATION};

use crate::client::RequestPipeline;

pub trait Authentication: Send + Sync {
    fn setup_connection(&self, pipeline: &mut RequestPipeline);
}

/// Leaves the client unauthenticated
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthentication;

impl Authentication for NoAuthentication {
    fn setup_connection(&self, _pipeline: &mut RequestPipeline) {}
}

/// HTTP Basic authentication via a default `Authorization` header
#[derive(Clone)]
pub struct BasicAuthentication {
    username: String,
    header: HeaderValue,
}

impl BasicAuthentication {
    pub fn new(username: impl Into<String>, password: impl AsRef<str>) -> Self {
        let username = username.into();
        let credentials = STANDARD.encode(format!("{}:{}", username, password.as_ref()));
        let mut header = HeaderValue::from_str(&format!("Basic {}", credentials))
            .expect("base64 output is a valid header value");
        header.set_sensitive(true);
        Self { username, header }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for BasicAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthentication")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Authentication for BasicAuthentication {
    fn setup_connection(&self, pipeline: &mut RequestPipeline) {
        pipeline.insert_default_header(AUTHORIZATION, self.header.clone());
    }
}
