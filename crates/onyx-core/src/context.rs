//! Shared state of one open database: storage, catalog, partition cache,
//! fan-out worker pool and edge locks.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::partition::{Partition, PartitionContext};
use crate::storage::StorageEngine;

/// Everything a query or cascade needs, shared across threads.
pub struct SchemaContext {
    config: EngineConfig,
    engine: Arc<StorageEngine>,
    catalog: Arc<Catalog>,
    partitions: PartitionContext,
    pool: Option<rayon::ThreadPool>,
    edge_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl SchemaContext {
    /// Open storage and catalog for a configuration.
    pub fn open(config: EngineConfig) -> Result<Self, Error> {
        let engine = Arc::new(StorageEngine::open(config.storage.clone())?);
        let catalog = Arc::new(Catalog::open(engine.db())?);
        let partitions = PartitionContext::new(
            Arc::clone(&engine),
            Arc::clone(&catalog),
            config.partition_cache_capacity,
        );

        let pool = if config.uses_worker_pool() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.fanout_threads)
                .thread_name(|i| format!("onyx-fanout-{}", i))
                .build()
                .map_err(|e| Error::WorkerPool(e.to_string()))?;
            Some(pool)
        } else {
            None
        };

        info!(
            schema_version = catalog.current_version(),
            fanout_threads = pool.as_ref().map_or(1, |p| p.current_num_threads()),
            "schema context opened"
        );

        Ok(Self {
            config,
            engine,
            catalog,
            partitions,
            pool,
            edge_locks: DashMap::new(),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Storage engine.
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Schema catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Partition cache.
    pub fn partitions(&self) -> &PartitionContext {
        &self.partitions
    }

    /// Lock guarding read-modify-write of one relationship's edge sets.
    pub fn edge_lock(&self, entity: &str, relationship: &str) -> Arc<Mutex<()>> {
        self.edge_locks
            .entry((entity.to_string(), relationship.to_string()))
            .or_default()
            .clone()
    }

    /// Run `scan` for every partition and collect the results in partition
    /// order.
    ///
    /// Every partition runs to completion even when a sibling fails; with
    /// more than one partition, failures are then reported together as
    /// [`Error::PartitionFanout`] carrying the first one.
    pub fn fan_out<T, F>(&self, partitions: &[Partition], scan: F) -> Result<Vec<T>, Error>
    where
        T: Send,
        F: Fn(Partition) -> Result<T, Error> + Send + Sync,
    {
        if partitions.len() == 1 {
            return Ok(vec![scan(partitions[0])?]);
        }

        let results: Vec<Result<T, Error>> = match &self.pool {
            Some(pool) => {
                debug!(partitions = partitions.len(), "parallel partition fan-out");
                pool.install(|| partitions.par_iter().map(|p| scan(*p)).collect())
            }
            None => partitions.iter().map(|p| scan(*p)).collect(),
        };

        let mut collected = Vec::with_capacity(results.len());
        let mut failures = 0;
        let mut first = None;
        for result in results {
            match result {
                Ok(value) => collected.push(value),
                Err(err) => {
                    failures += 1;
                    if first.is_none() {
                        first = Some(err);
                    } else {
                        warn!(error = %err, "additional partition failure");
                    }
                }
            }
        }

        match first {
            None => Ok(collected),
            Some(first) => Err(Error::PartitionFanout {
                failures,
                first: Box::new(first),
            }),
        }
    }

    /// Drop cached partition state after the schema changed.
    pub fn schema_changed(&self) {
        self.partitions.evict_all();
    }

    /// Evict caches and flush storage.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.partitions.evict_all();
        self.edge_locks.clear();
        self.catalog.flush()?;
        self.engine.flush()?;
        info!("schema context shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context(threads: usize) -> SchemaContext {
        SchemaContext::open(EngineConfig::temporary().with_fanout_threads(threads)).unwrap()
    }

    #[test]
    fn test_fan_out_preserves_partition_order() {
        for threads in [1, 4] {
            let ctx = test_context(threads);
            let partitions: Vec<Partition> = (0..6).map(Partition::from_id).collect();
            let ids = ctx.fan_out(&partitions, |p| Ok(p.id())).unwrap();
            assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_fan_out_collects_failures() {
        for threads in [1, 3] {
            let ctx = test_context(threads);
            let partitions: Vec<Partition> = (0..5).map(Partition::from_id).collect();
            let completed = std::sync::atomic::AtomicUsize::new(0);

            let result = ctx.fan_out(&partitions, |p| {
                completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if p.id() % 2 == 1 {
                    Err(Error::InvalidQuery(format!("partition {} failed", p)))
                } else {
                    Ok(())
                }
            });

            // siblings still finish
            assert_eq!(completed.load(std::sync::atomic::Ordering::SeqCst), 5);
            match result {
                Err(Error::PartitionFanout { failures, first }) => {
                    assert_eq!(failures, 2);
                    assert!(matches!(*first, Error::InvalidQuery(_)));
                }
                other => panic!("expected fan-out failure, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_single_partition_error_is_not_wrapped() {
        let ctx = test_context(1);
        let result: Result<Vec<()>, Error> =
            ctx.fan_out(&[Partition::None], |_| Err(Error::InvalidQuery("x".into())));
        assert!(matches!(result, Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_edge_locks_are_shared() {
        let ctx = test_context(1);
        let a = ctx.edge_lock("Parent", "children");
        let b = ctx.edge_lock("Parent", "children");
        let c = ctx.edge_lock("Parent", "pets");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
