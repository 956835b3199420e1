//! Bounded pool of interpreter engines
//!
//! Engines are created on demand up to `max_engines`, reused LIFO, and
//! retired once they have served `max_cycles` executions. Callers beyond
//! capacity block on a condition variable until an engine is checked in.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::engine::{Engine, Runtime, RuntimeKind};
use crate::error::{Result, ScriptError};
use crate::stats::ScriptStats;

#[derive(Debug, Default)]
struct PoolState {
    free: Vec<Engine>,
    busy: HashMap<u64, u64>,
    n_total: usize,
}

/// Engine pool of one script
#[derive(Debug)]
pub struct EnginePool {
    runtime: Runtime,
    max_engines: usize,
    max_cycles: u64,
    checkout_timeout: Option<Duration>,
    state: Mutex<PoolState>,
    available: Condvar,
    next_id: AtomicU64,
    stats: Arc<ScriptStats>,
}

/// Point-in-time pool figures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Live engines
    pub total: usize,
    /// Engines waiting in the free list
    pub free: usize,
    /// Checked-out engines
    pub busy: usize,
    /// Bytes used by live engines
    pub memory: u64,
}

impl EnginePool {
    pub(crate) fn new(
        runtime: Runtime,
        max_engines: usize,
        max_cycles: u64,
        checkout_timeout: Option<Duration>,
        stats: Arc<ScriptStats>,
    ) -> Self {
        Self {
            runtime,
            max_engines,
            max_cycles,
            checkout_timeout,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            next_id: AtomicU64::new(1),
            stats,
        }
    }

    /// Language of the pooled engines
    pub fn kind(&self) -> RuntimeKind {
        self.runtime.kind()
    }

    /// Capacity
    pub fn max_engines(&self) -> usize {
        self.max_engines
    }

    /// Take an engine, creating one if below capacity, blocking otherwise
    pub fn checkout(&self) -> Result<PooledEngine<'_>> {
        let deadline = self.checkout_timeout.map(|timeout| Instant::now() + timeout);
        let started = Instant::now();
        let mut blocked = false;
        let mut state = self.state.lock();

        loop {
            while let Some(engine) = state.free.pop() {
                if self.max_cycles > 0 && engine.cycles() >= self.max_cycles {
                    state.n_total -= 1;
                    self.stats.record_engine_retired();
                    debug!(engine = engine.id(), cycles = engine.cycles(), "Retiring engine");
                    drop(engine);
                    continue;
                }
                state.busy.insert(engine.id(), engine.memory());
                return Ok(self.lease(engine));
            }

            if state.n_total < self.max_engines {
                state.n_total += 1;
                let created = MutexGuard::unlocked(&mut state, || self.create_engine());
                match created {
                    Ok(engine) => {
                        state.busy.insert(engine.id(), engine.memory());
                        return Ok(self.lease(engine));
                    }
                    Err(e) => {
                        state.n_total -= 1;
                        self.available.notify_one();
                        return Err(e);
                    }
                }
            }

            if !blocked {
                blocked = true;
                self.stats.record_worker_blocked();
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out()
                        && state.free.is_empty()
                        && state.n_total >= self.max_engines
                    {
                        return Err(ScriptError::PoolExhausted {
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    fn create_engine(&self) -> Result<Engine> {
        let interpreter = self.runtime.create()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.stats.record_engine_created();
        debug!(engine = id, kind = %self.runtime.kind(), "Created engine");
        Ok(Engine::new(id, self.runtime.kind(), interpreter))
    }

    fn lease(&self, engine: Engine) -> PooledEngine<'_> {
        PooledEngine {
            pool: self,
            engine: Some(engine),
        }
    }

    fn checkin(&self, mut engine: Engine) {
        engine.refresh_memory();
        let depth = engine.interpreter().stack_depth();
        if depth != 0 {
            warn!(engine = engine.id(), depth, "Found non-zero stack when unlocking engine");
        }

        let mut state = self.state.lock();
        assert!(
            state.busy.remove(&engine.id()).is_some(),
            "engine {} checked in but not busy",
            engine.id()
        );
        state.free.push(engine);
        drop(state);
        self.available.notify_one();
    }

    /// Live engines (`free + busy`)
    pub fn n_total(&self) -> usize {
        self.state.lock().n_total
    }

    /// Engines waiting in the free list
    pub fn free_len(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Checked-out engines
    pub fn busy_len(&self) -> usize {
        self.state.lock().busy.len()
    }

    /// Memory of live engines: current for free ones, as of checkout for
    /// busy ones
    pub fn memory(&self) -> u64 {
        self.snapshot().memory
    }

    /// Consistent view of the pool taken under its lock
    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        let memory = state.free.iter().map(Engine::memory).sum::<u64>()
            + state.busy.values().sum::<u64>();
        PoolSnapshot {
            total: state.n_total,
            free: state.free.len(),
            busy: state.busy.len(),
            memory,
        }
    }
}

/// Checked-out engine; returned to the pool on drop
#[derive(Debug)]
pub struct PooledEngine<'a> {
    pool: &'a EnginePool,
    engine: Option<Engine>,
}

impl Deref for PooledEngine<'_> {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        match &self.engine {
            Some(engine) => engine,
            None => unreachable!("engine is present until drop"),
        }
    }
}

impl DerefMut for PooledEngine<'_> {
    fn deref_mut(&mut self) -> &mut Engine {
        match &mut self.engine {
            Some(engine) => engine,
            None => unreachable!("engine is present until drop"),
        }
    }
}

impl Drop for PooledEngine<'_> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.checkin(engine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::config::ScriptConfig;
    use crate::library::Library;
    use std::thread;

    fn pool(max_engines: usize, max_cycles: u64, timeout: Option<Duration>) -> EnginePool {
        let library = Library::acquire();
        let runtime = Runtime::new(&ScriptConfig::default(), Bridge::new("test"), &library);
        EnginePool::new(runtime, max_engines, max_cycles, timeout, Arc::new(ScriptStats::new()))
    }

    #[test]
    fn test_checkout_creates_then_reuses() {
        let pool = pool(2, 0, None);

        let id = {
            let engine = pool.checkout().unwrap();
            assert_eq!(pool.busy_len(), 1);
            engine.id()
        };
        assert_eq!(pool.free_len(), 1);
        assert_eq!(pool.n_total(), 1);

        let engine = pool.checkout().unwrap();
        assert_eq!(engine.id(), id);
        assert_eq!(pool.stats.engines_total(), 1);
    }

    #[test]
    fn test_distinct_engines() {
        let pool = pool(2, 0, None);
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        assert_ne!(a.id(), b.id());

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.busy, 2);
        assert_eq!(snapshot.free, 0);
    }

    #[test]
    fn test_retirement() {
        let pool = pool(1, 3, None);
        let first = {
            let mut engine = pool.checkout().unwrap();
            for _ in 0..3 {
                engine.record_cycle();
            }
            engine.id()
        };

        let engine = pool.checkout().unwrap();
        assert_ne!(engine.id(), first);
        assert_eq!(pool.stats.engines_dropped_cycles(), 1);
        assert_eq!(pool.stats.engines_total(), 2);
        assert_eq!(pool.n_total(), 1);
    }

    #[test]
    fn test_checkout_timeout() {
        let pool = pool(1, 0, Some(Duration::from_millis(20)));
        let _held = pool.checkout().unwrap();

        let err = pool.checkout().unwrap_err();
        assert!(matches!(err, ScriptError::PoolExhausted { .. }));
        assert_eq!(pool.stats.workers_blocked(), 1);
    }

    #[test]
    fn test_blocked_worker_resumes() {
        let pool = pool(1, 0, None);
        let held = pool.checkout().unwrap();
        let id = held.id();

        thread::scope(|s| {
            let waiter = s.spawn(|| pool.checkout().map(|engine| engine.id()));
            while pool.stats.workers_blocked() == 0 {
                thread::yield_now();
            }
            drop(held);
            assert_eq!(waiter.join().unwrap().unwrap(), id);
        });

        assert_eq!(pool.n_total(), 1);
        assert_eq!(pool.free_len(), 1);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let pool = pool(3, 2, None);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..20 {
                        let mut engine = pool.checkout().unwrap();
                        engine.record_cycle();
                        assert!(pool.n_total() <= 3);
                    }
                });
            }
        });

        let snapshot = pool.snapshot();
        assert!(snapshot.total <= 3);
        assert_eq!(snapshot.total, snapshot.free + snapshot.busy);
        assert_eq!(snapshot.busy, 0);
    }
}
