//! Registry configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::registry::ConnectionRegistry;

/// Default growth granularity of an object's edge table.
pub const DEFAULT_TABLE_BLOCK: usize = 8;

/// Configuration for a [`ConnectionRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Edge tables grow to a multiple of this many signal entries. Zero is
    /// treated as one.
    pub table_block: usize,
    /// Drain an object's orphan chain as soon as no emission on it is in
    /// flight. When `false`, retired tables and edges are only reclaimed at
    /// object destruction or by an explicit
    /// [`reclaim`](ConnectionRegistry::reclaim).
    pub reclaim_on_quiescence: bool,
    /// Upper bound on how long a blocking queued delivery waits for the
    /// receiver's thread. `None` waits indefinitely.
    pub blocking_timeout: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            table_block: DEFAULT_TABLE_BLOCK,
            reclaim_on_quiescence: true,
            blocking_timeout: None,
        }
    }
}

impl RegistryConfig {
    /// Effective table block, never zero.
    pub(crate) fn block(&self) -> usize {
        self.table_block.max(1)
    }
}

/// Builder for creating registries with custom configuration.
///
/// # Example
///
/// ```
/// use horizon_lattice_connect::RegistryBuilder;
/// use std::time::Duration;
///
/// let registry = RegistryBuilder::new()
///     .table_block(4)
///     .blocking_timeout(Duration::from_secs(2))
///     .build();
/// assert_eq!(registry.config().table_block, 4);
/// ```
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    config: RegistryConfig,
}

impl RegistryBuilder {
    /// Create a new RegistryBuilder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the edge table growth granularity.
    pub fn table_block(mut self, block: usize) -> Self {
        self.config.table_block = block;
        self
    }

    /// Enable or disable reclamation at quiescent points.
    pub fn reclaim_on_quiescence(mut self, enabled: bool) -> Self {
        self.config.reclaim_on_quiescence = enabled;
        self
    }

    /// Bound how long blocking queued deliveries wait.
    pub fn blocking_timeout(mut self, timeout: Duration) -> Self {
        self.config.blocking_timeout = Some(timeout);
        self
    }

    /// Build the registry.
    pub fn build(self) -> ConnectionRegistry {
        ConnectionRegistry::with_config(self.config)
    }

    /// Build the registry behind an `Arc`, as needed by
    /// [`ObjectBase`](crate::ObjectBase) and scoped connections.
    pub fn build_shared(self) -> Arc<ConnectionRegistry> {
        Arc::new(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.table_block, DEFAULT_TABLE_BLOCK);
        assert!(config.reclaim_on_quiescence);
        assert_eq!(config.blocking_timeout, None);
    }

    #[test]
    fn test_zero_block_clamped() {
        let config = RegistryConfig {
            table_block: 0,
            ..Default::default()
        };
        assert_eq!(config.block(), 1);
    }

    #[test]
    fn test_builder() {
        let registry = RegistryBuilder::new()
            .table_block(2)
            .reclaim_on_quiescence(false)
            .blocking_timeout(Duration::from_millis(50))
            .build();

        let config = registry.config();
        assert_eq!(config.table_block, 2);
        assert!(!config.reclaim_on_quiescence);
        assert_eq!(config.blocking_timeout, Some(Duration::from_millis(50)));
    }
}
