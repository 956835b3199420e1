//! Aggregate script statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the pool and the execution core
#[derive(Debug, Default)]
pub struct ScriptStats {
    engines_total: AtomicU64,
    engines_dropped_cycles: AtomicU64,
    workers_blocked: AtomicU64,
    executions_total: AtomicU64,
    executions_unknown: AtomicU64,
    executions_failed: AtomicU64,
    executions_gc: AtomicU64,
}

impl ScriptStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_engine_created(&self) {
        self.engines_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_engine_retired(&self) {
        self.engines_dropped_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_worker_blocked(&self) {
        self.workers_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown_function(&self) {
        self.executions_unknown.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_execution(&self, success: bool) {
        self.executions_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.executions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_gc(&self) {
        self.executions_gc.fetch_add(1, Ordering::Relaxed);
    }

    /// Engines created so far
    pub fn engines_total(&self) -> u64 {
        self.engines_total.load(Ordering::Relaxed)
    }

    /// Engines retired after exhausting their cycle budget
    pub fn engines_dropped_cycles(&self) -> u64 {
        self.engines_dropped_cycles.load(Ordering::Relaxed)
    }

    /// Times a worker had to wait for a free engine
    pub fn workers_blocked(&self) -> u64 {
        self.workers_blocked.load(Ordering::Relaxed)
    }

    /// Executions, including check-only ones
    pub fn executions_total(&self) -> u64 {
        self.executions_total.load(Ordering::Relaxed)
    }

    /// Executions that had to compile the function first
    pub fn executions_unknown(&self) -> u64 {
        self.executions_unknown.load(Ordering::Relaxed)
    }

    /// Failed executions
    pub fn executions_failed(&self) -> u64 {
        self.executions_failed.load(Ordering::Relaxed)
    }

    /// Collections run after an execution
    pub fn executions_gc(&self) -> u64 {
        self.executions_gc.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a script, serialized as the stats JSON document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Engine pool
    pub engines: EngineStats,
    /// Regexp cache
    pub regexps: CurrentStats,
    /// Shared variables
    pub variables: CurrentStats,
    /// Workers
    pub workers: WorkerStats,
    /// Executions
    pub executions: ExecutionStats,
}

/// Engine pool figures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Live engines
    pub current: u64,
    /// Engines ever created
    pub total: u64,
    /// Bytes used by live engines
    pub memory: u64,
    /// Retired engines
    pub dropped: DroppedStats,
}

/// Retirement figures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedStats {
    /// Retired after exhausting the cycle budget
    pub cycles: u64,
}

/// Size of a collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStats {
    /// Current number of entries
    pub current: u64,
}

/// Worker figures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Blocking episodes waiting for an engine
    pub blocked: u64,
}

/// Execution figures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// All executions
    pub total: u64,
    /// Executions that compiled the function first
    pub unknown: u64,
    /// Failed executions
    pub failed: u64,
    /// Collections
    pub gc: u64,
}

impl StatsSnapshot {
    /// Look up a counter by its dotted name (e.g. `engines.dropped.cycles`)
    pub fn counter(&self, name: &str) -> Option<u64> {
        let value = match name {
            "engines.current" => self.engines.current,
            "engines.total" => self.engines.total,
            "engines.memory" => self.engines.memory,
            "engines.dropped.cycles" => self.engines.dropped.cycles,
            "regexps.current" => self.regexps.current,
            "variables.current" => self.variables.current,
            "workers.blocked" => self.workers.blocked,
            "executions.total" => self.executions.total,
            "executions.unknown" => self.executions.unknown,
            "executions.failed" => self.executions.failed,
            "executions.gc" => self.executions.gc,
            _ => return None,
        };
        Some(value)
    }

    /// Compact JSON rendering
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
