//! Connection pools and their reconstruction
//!
//! This module provides:
//! - Scheme registries describing what a pool can reach
//! - A hyper-backed pool with forceful shutdown
//! - Factories that rebuild a pool from its scheme registry

pub mod connection;
pub mod factory;
pub mod scheme;

pub use connection::{ConnectionManager, HyperConnectionManager, PoolConfig, PoolError, PoolStats};
pub use factory::{HyperPoolFactory, PoolFactory};
pub use scheme::{Scheme, SchemeRegistry, SocketFactory, TcpOptions};
