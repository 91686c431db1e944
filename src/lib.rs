//! restartable-http - HTTP client facade whose client and connection pool
//! can be torn down and rebuilt while callers keep using it

pub mod auth;
pub mod client;
pub mod config;
pub mod pool;

pub use client::{HttpClient, RestartableHttpClient};
pub use config::Config;
