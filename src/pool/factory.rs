//! Rebuilding connection pools from a shape descriptor
//!
//! A restart discards a pool and needs a fresh one with the same scheme
//! support. The factory is supplied up front and returns the same concrete
//! pool type it is parameterized over, so a restart can never fall back to
//! a generic default pool.

use super::connection::{HyperConnectionManager, PoolConfig, Result};
use super::scheme::SchemeRegistry;

/// Builds a new, empty pool of type `M` from a scheme registry
pub trait PoolFactory<M>: Send + Sync {
    fn create(&self, shape: &SchemeRegistry) -> Result<M>;
}

impl<M, F> PoolFactory<M> for F
where
    F: Fn(&SchemeRegistry) -> Result<M> + Send + Sync,
{
    fn create(&self, shape: &SchemeRegistry) -> Result<M> {
        self(shape)
    }
}

/// Factory for [`HyperConnectionManager`] that carries the non-shape
/// configuration (idle timeout, per-host limits) across rebuilds
#[derive(Debug, Clone, Default)]
pub struct HyperPoolFactory {
    config: PoolConfig,
}

impl HyperPoolFactory {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl PoolFactory<HyperConnectionManager> for HyperPoolFactory {
    fn create(&self, shape: &SchemeRegistry) -> Result<HyperConnectionManager> {
        HyperConnectionManager::new(shape.clone(), self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{ConnectionManager, PoolError, Scheme};
    use std::time::Duration;

    #[tokio::test]
    async fn test_factory_preserves_shape_and_config() {
        let config = PoolConfig {
            idle_timeout: Duration::from_secs(5),
            max_idle_per_host: 3,
        };
        let mut shape = SchemeRegistry::new();
        shape.register(Scheme::plain("http", 8080));

        let original = HyperConnectionManager::new(shape.clone(), config.clone()).unwrap();
        let rebuilt = original.factory().create(original.scheme_registry()).unwrap();

        assert_eq!(rebuilt.scheme_registry(), &shape);
        assert_eq!(rebuilt.config(), &config);
        assert!(!rebuilt.is_shut_down());
    }

    #[tokio::test]
    async fn test_factory_rejects_empty_shape() {
        let factory = HyperPoolFactory::default();
        let err = factory.create(&SchemeRegistry::new()).unwrap_err();
        assert!(matches!(err, PoolError::Construction(_)));
    }

    #[test]
    fn test_closure_factory() {
        let factory = |shape: &SchemeRegistry| -> Result<usize> { Ok(shape.len()) };
        assert_eq!(factory.create(&SchemeRegistry::with_defaults()).unwrap(), 2);
    }
}
