// src/runtime/engine_pool.rs
//! Engine pool with dispose-and-replace semantics
//!
//! Engines are never reset and handed out again. Every returned engine is
//! disposed, and a fresh one is built in its place while the idle reserve is
//! below its ceiling. Nothing a script leaves behind (globals, closures,
//! pending jobs, bound host objects) can reach the next execution.
//!
//! # Architecture
//!
//! ```text
//! EnginePool
//! ├─ Idle:   [Engine7, Engine8]   (pre-built, never used)
//! ├─ Active: Engine5, Engine6     (owned by their executions)
//! └─ Return: Engine5 → dispose → build Engine9 → Idle (if below max)
//! ```
//!
//! `max_pool_size` caps the idle reserve only. `rent()` never waits: when the
//! reserve is empty it builds an engine on the spot. Concurrency is bounded
//! separately by the `ConcurrencyGate`.

use crate::observability::metric_names;
use crate::runtime::engine::ScriptEngine;
use crate::runtime::limits::EngineLimits;
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Engines built at construction, capped by `max_pool_size`
const PREWARM_COUNT: usize = 2;

/// Configuration for the engine pool
#[derive(Debug, Clone)]
pub struct EnginePoolConfig {
    /// Ceiling on idle engines held in reserve (default: 10)
    pub max_pool_size: usize,

    /// Limits applied to every engine
    pub limits: EngineLimits,
}

impl Default for EnginePoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 10,
            limits: EngineLimits::default(),
        }
    }
}

impl EnginePoolConfig {
    /// Number of engines built up front
    pub fn prewarm_count(&self) -> usize {
        PREWARM_COUNT.min(self.max_pool_size)
    }
}

impl From<&EngineConfig> for EnginePoolConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_pool_size: config.pool.max_pool_size,
            limits: config.limits.clone(),
        }
    }
}

/// Pool of isolated script engines
pub struct EnginePool {
    /// Configuration
    config: EnginePoolConfig,

    /// Idle reserve; the teardown flag is flipped under this lock
    idle: Mutex<VecDeque<ScriptEngine>>,

    disposed: AtomicBool,

    /// Next engine ID
    next_id: AtomicU64,

    /// Engines currently rented out
    active: AtomicUsize,

    created: AtomicU64,
    destroyed: AtomicU64,
}

impl EnginePool {
    /// Create a new pool with the default engine limits
    pub fn new(max_pool_size: usize) -> Result<Self> {
        let config = EnginePoolConfig {
            max_pool_size,
            ..Default::default()
        };

        Self::with_config(config)
    }

    /// Create a pool with custom configuration
    pub fn with_config(config: EnginePoolConfig) -> Result<Self> {
        config.limits.validate().map_err(EngineError::ConfigError)?;

        let pool = Self {
            idle: Mutex::new(VecDeque::with_capacity(config.max_pool_size)),
            config,
            disposed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        };

        pool.prewarm()?;

        info!(
            max_pool_size = pool.config.max_pool_size,
            prewarmed = pool.config.prewarm_count(),
            "Engine pool initialized"
        );

        Ok(pool)
    }

    /// Pre-build the initial idle reserve
    fn prewarm(&self) -> Result<()> {
        for _ in 0..self.config.prewarm_count() {
            let engine = self.create_engine()?;
            self.idle.lock().push_back(engine);
        }

        self.publish_idle();
        Ok(())
    }

    /// Rent an engine; builds one when the reserve is empty
    pub fn rent(&self) -> Result<ScriptEngine> {
        let pooled = {
            let mut idle = self.idle.lock();
            if self.disposed.load(Ordering::SeqCst) {
                return Err(EngineError::PoolDisposed);
            }
            idle.pop_front()
        };

        let engine = match pooled {
            Some(engine) => {
                debug!(engine_id = engine.id(), "Rented engine from idle reserve");
                engine
            }
            None => {
                let engine = self.create_engine()?;
                debug!(engine_id = engine.id(), "Idle reserve empty, built engine on demand");
                engine
            }
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        self.publish_idle();

        Ok(engine)
    }

    /// Return a rented engine: always disposed, replaced while below capacity
    pub fn return_engine(&self, engine: ScriptEngine) {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        let returned_id = engine.id();
        self.dispose_engine(engine);

        if self.is_disposed() {
            debug!(engine_id = returned_id, "Pool torn down, not replacing engine");
            return;
        }

        if self.idle_count() >= self.config.max_pool_size {
            return;
        }

        let fresh = match self.create_engine() {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(engine_id = returned_id, "Failed to build replacement engine: {}", e);
                return;
            }
        };

        // Re-check under the lock; other returns may have filled the reserve
        let rejected = {
            let mut idle = self.idle.lock();
            if !self.disposed.load(Ordering::SeqCst) && idle.len() < self.config.max_pool_size {
                idle.push_back(fresh);
                None
            } else {
                Some(fresh)
            }
        };

        if let Some(surplus) = rejected {
            self.dispose_engine(surplus);
        }

        self.publish_idle();
    }

    /// Drain and dispose all idle engines; later rents fail
    ///
    /// Idempotent.
    pub fn teardown(&self) {
        let drained: Vec<ScriptEngine> = {
            let mut idle = self.idle.lock();
            if self.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
            idle.drain(..).collect()
        };

        let count = drained.len();
        for engine in drained {
            self.dispose_engine(engine);
        }

        self.publish_idle();
        info!(disposed_idle = count, "Engine pool torn down");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &EnginePoolConfig {
        &self.config
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_pool_size: self.config.max_pool_size,
            idle_engines: self.idle_count(),
            active_engines: self.active.load(Ordering::SeqCst),
            engines_created: self.created.load(Ordering::SeqCst),
            engines_disposed: self.destroyed.load(Ordering::SeqCst),
            disposed: self.is_disposed(),
        }
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn create_engine(&self) -> Result<ScriptEngine> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let engine = ScriptEngine::new(id, &self.config.limits)?;

        self.created.fetch_add(1, Ordering::SeqCst);
        metrics::counter!(metric_names::ENGINES_CREATED_TOTAL).increment(1);

        Ok(engine)
    }

    fn dispose_engine(&self, engine: ScriptEngine) {
        engine.dispose();
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        metrics::counter!(metric_names::ENGINES_DISPOSED_TOTAL).increment(1);
    }

    fn publish_idle(&self) {
        metrics::gauge!(metric_names::POOL_IDLE_ENGINES).set(self.idle_count() as f64);
    }
}

impl Drop for EnginePool {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub max_pool_size: usize,
    pub idle_engines: usize,
    pub active_engines: usize,
    pub engines_created: u64,
    pub engines_disposed: u64,
    pub disposed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rquickjs::Value;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_pool_creation() {
        let pool = EnginePool::new(8).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.max_pool_size, 8);
        assert_eq!(stats.idle_engines, 2);
        assert_eq!(stats.active_engines, 0);
    }

    #[test]
    fn test_prewarm_is_capped_by_max() {
        assert_eq!(EnginePool::new(1).unwrap().stats().idle_engines, 1);
        assert_eq!(EnginePool::new(0).unwrap().stats().idle_engines, 0);
    }

    #[test]
    fn test_rent_never_blocks_past_reserve() {
        let pool = EnginePool::new(1).unwrap();

        let engines: Vec<ScriptEngine> = (0..4).map(|_| pool.rent().unwrap()).collect();
        let ids: HashSet<u64> = engines.iter().map(|e| e.id()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(pool.stats().active_engines, 4);

        for engine in engines {
            pool.return_engine(engine);
        }
        assert_eq!(pool.stats().active_engines, 0);
    }

    #[test]
    fn test_returned_engine_is_never_reused() {
        let pool = EnginePool::new(2).unwrap();

        let engine = pool.rent().unwrap();
        let returned_id = engine.id();
        pool.return_engine(engine);

        for _ in 0..5 {
            let engine = pool.rent().unwrap();
            assert_ne!(engine.id(), returned_id);
            pool.return_engine(engine);
        }
    }

    #[test]
    fn test_globals_do_not_survive_return() {
        let pool = EnginePool::new(2).unwrap();

        let engine = pool.rent().unwrap();
        engine.with_context(|ctx| {
            ctx.eval::<Value, _>("globalThis.secret = 'tenant-a';").map(|_| ()).unwrap();
        });
        pool.return_engine(engine);

        // Drain everything the pool can hand out next
        let engines: Vec<ScriptEngine> = (0..3).map(|_| pool.rent().unwrap()).collect();
        for engine in &engines {
            let visible: bool =
                engine.with_context(|ctx| ctx.eval("typeof secret !== 'undefined'").unwrap());
            assert!(!visible);
        }
        for engine in engines {
            pool.return_engine(engine);
        }
    }

    #[test]
    fn test_idle_never_exceeds_max() {
        let pool = EnginePool::new(2).unwrap();

        let engines: Vec<ScriptEngine> = (0..6).map(|_| pool.rent().unwrap()).collect();
        for engine in engines {
            pool.return_engine(engine);
            assert!(pool.stats().idle_engines <= 2);
        }
        assert_eq!(pool.stats().idle_engines, 2);
    }

    #[test]
    fn test_teardown() {
        let pool = EnginePool::new(4).unwrap();
        let engine = pool.rent().unwrap();

        pool.teardown();
        pool.teardown();

        assert!(matches!(pool.rent(), Err(EngineError::PoolDisposed)));
        assert!(matches!(pool.rent(), Err(EngineError::PoolDisposed)));

        // Late returns are disposed without replacement
        pool.return_engine(engine);
        let stats = pool.stats();
        assert!(stats.disposed);
        assert_eq!(stats.idle_engines, 0);
        assert_eq!(stats.active_engines, 0);
    }

    #[test]
    fn test_concurrent_rent_return() {
        let pool = Arc::new(EnginePool::new(4).unwrap());
        let in_use = Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let in_use = Arc::clone(&in_use);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        let engine = pool.rent().unwrap();
                        assert!(in_use.lock().insert(engine.id()), "engine handed out twice");
                        std::thread::sleep(std::time::Duration::from_millis(1));
                        assert!(in_use.lock().remove(&engine.id()));
                        pool.return_engine(engine);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.active_engines, 0);
        assert!(stats.idle_engines <= 4);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_idle_bounded_by_max(max in 0usize..4, ops in proptest::collection::vec(any::<bool>(), 1..24)) {
            let pool = EnginePool::new(max).unwrap();
            let mut rented = Vec::new();

            for rent in ops {
                if rent {
                    rented.push(pool.rent().unwrap());
                } else if let Some(engine) = rented.pop() {
                    pool.return_engine(engine);
                    prop_assert!(pool.stats().idle_engines <= max);
                }
            }

            for engine in rented {
                pool.return_engine(engine);
                prop_assert!(pool.stats().idle_engines <= max);
            }
        }
    }
}
