//! Engine configuration.

use crate::storage::StorageConfig;

/// Default bound of each partition context cache.
pub const DEFAULT_PARTITION_CACHE_CAPACITY: usize = 256;

/// Default recursion limit for cascading save, delete and hydrate.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 100;

/// Configuration for an [`EntityManager`](crate::EntityManager).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Storage configuration.
    pub storage: StorageConfig,

    /// Maximum entries held by each partition context cache.
    pub partition_cache_capacity: usize,

    /// Worker threads used to fan scans out across partitions.
    pub fanout_threads: usize,

    /// Scan partitions in parallel when a query covers more than one.
    pub parallel_fanout: bool,

    /// Maximum nesting of a cascading operation.
    pub max_cascade_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            partition_cache_capacity: DEFAULT_PARTITION_CACHE_CAPACITY,
            fanout_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            parallel_fanout: true,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Create a configuration storing data at `path`.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            storage: StorageConfig::new(path),
            ..Default::default()
        }
    }

    /// Create a temporary configuration for testing.
    pub fn temporary() -> Self {
        Self {
            storage: StorageConfig::temporary(),
            ..Default::default()
        }
    }

    /// Replace the storage configuration.
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Set the partition context cache bound.
    pub fn with_partition_cache_capacity(mut self, capacity: usize) -> Self {
        self.partition_cache_capacity = capacity;
        self
    }

    /// Set the fan-out worker count; one disables parallel fan-out.
    pub fn with_fanout_threads(mut self, threads: usize) -> Self {
        self.fanout_threads = threads.max(1);
        if self.fanout_threads == 1 {
            self.parallel_fanout = false;
        }
        self
    }

    /// Enable or disable parallel fan-out.
    pub fn with_parallel_fanout(mut self, enabled: bool) -> Self {
        self.parallel_fanout = enabled;
        self
    }

    /// Set the cascade recursion limit.
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// Whether partition scans run on the worker pool.
    pub fn uses_worker_pool(&self) -> bool {
        self.parallel_fanout && self.fanout_threads > 1
    }
}
