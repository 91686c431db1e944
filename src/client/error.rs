use std::time::Duration;
use thiserror::Error;

use crate::pool::PoolError;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Client has not been set up")]
    NotReady,

    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Failed to decompress response body: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("Missing required component: {0}")]
    MissingComponent(&'static str),

    #[error("Response handler failed: {0}")]
    Handler(String),
}

impl ClientError {
    /// True when the request failed because its pool was torn down
    pub fn is_pool_shutdown(&self) -> bool {
        matches!(self, ClientError::Pool(PoolError::Shutdown))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
