//! Execution core: one script invocation against a pooled engine

use std::sync::Arc;

use tracing::{debug, error, warn};
use vcfg_core::RequestContext;
use vcfg_state::Variables;

use crate::bridge::Bridge;
use crate::config::ScriptConfig;
use crate::engine::{Engine, Runtime};
use crate::error::ScriptError;
use crate::library::Library;
use crate::pool::EnginePool;
use crate::registry::function_name;
use crate::result::ExecutionResult;
use crate::stats::ScriptStats;

/// Length of the code excerpt quoted in logs
const CODE_EXCERPT_LEN: usize = 80;

/// Inputs of a full call; absent for check-only executions
#[derive(Debug)]
pub(crate) struct Call<'a> {
    pub(crate) argv: &'a [String],
    pub(crate) ctx: Option<RequestContext>,
    pub(crate) variables: &'a mut Variables,
}

/// Outcome of [`ExecutionCore::execute`]
#[derive(Debug)]
pub(crate) struct Execution {
    pub(crate) name: String,
    pub(crate) success: bool,
    pub(crate) result: ExecutionResult,
}

impl Execution {
    fn failed(name: String) -> Self {
        Self {
            name,
            success: false,
            result: ExecutionResult::error(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ExecutionCore {
    script: String,
    pool: EnginePool,
    bridge: Bridge,
    stats: Arc<ScriptStats>,
    min_gc_cycles: u64,
    cache_flush: Option<fn()>,
}

impl ExecutionCore {
    pub(crate) fn new(script: &str, config: &ScriptConfig, library: &Library) -> Self {
        let bridge = Bridge::new(script);
        let stats = Arc::new(ScriptStats::new());
        let runtime = Runtime::new(config, bridge.clone(), library);
        let pool = EnginePool::new(
            runtime,
            config.max_engines,
            config.max_cycles,
            config.checkout_timeout,
            stats.clone(),
        );

        Self {
            script: script.to_string(),
            pool,
            bridge,
            stats,
            min_gc_cycles: config.min_gc_cycles.max(1),
            cache_flush: None,
        }
    }

    pub(crate) fn set_cache_flush(&mut self, flush: fn()) {
        self.cache_flush = Some(flush);
    }

    pub(crate) fn pool(&self) -> &EnginePool {
        &self.pool
    }

    pub(crate) fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub(crate) fn stats(&self) -> &ScriptStats {
        &self.stats
    }

    /// Run `code` (or only compile it when `call` is `None`)
    ///
    /// Every path after checkout counts a cycle on the engine, applies GC
    /// pacing and returns the engine to the pool.
    pub(crate) fn execute(
        &self,
        code: &str,
        name: Option<&str>,
        call: Option<Call<'_>>,
        gc_collect: bool,
        flush_cache: bool,
    ) -> Execution {
        let name = name.map_or_else(|| function_name(code), str::to_string);

        let mut engine = match self.pool.checkout() {
            Ok(engine) => engine,
            Err(e) => {
                error!(script = %self.script, function = %name, error = %e, "Failed to get script engine");
                self.stats.record_execution(false);
                return Execution::failed(name);
            }
        };

        let (success, result) = self.run(&mut engine, code, &name, call);
        self.stats.record_execution(success);

        let cycles = engine.record_cycle();
        if gc_collect || cycles % self.min_gc_cycles == 0 {
            match engine.interpreter_mut().collect_garbage(gc_collect) {
                Ok(()) => self.stats.record_gc(),
                Err(e) => warn!(script = %self.script, engine = engine.id(), error = %e, "Failed to collect garbage"),
            }
        }

        self.flush(flush_cache);
        drop(engine);

        Execution {
            name,
            success,
            result,
        }
    }

    /// Compile if needed, then call unless check-only
    fn run(
        &self,
        engine: &mut Engine,
        code: &str,
        name: &str,
        call: Option<Call<'_>>,
    ) -> (bool, ExecutionResult) {
        if !engine.interpreter().has_function(name) {
            self.stats.record_unknown_function();
            if let Err(e) = engine.interpreter_mut().define_function(name, code) {
                error!(
                    script = %self.script,
                    function = %name,
                    code = %excerpt(code),
                    error = %e,
                    "Failed to compile new script"
                );
                return (false, ExecutionResult::error());
            }
            debug!(script = %self.script, function = %name, engine = engine.id(), "Compiled new script");
        }

        let Some(call) = call else {
            return (true, ExecutionResult::default());
        };

        let outcome = {
            let _scope = self.bridge.enter(call.ctx, call.variables);
            engine.interpreter_mut().call_function(name, call.argv)
        };

        match outcome {
            Ok(result) => (true, result),
            Err(e @ ScriptError::MarshalError { .. }) => {
                error!(script = %self.script, function = %name, error = %e, "Failed to process script result");
                (false, ExecutionResult::error())
            }
            Err(e) => {
                error!(script = %self.script, function = %name, error = %e, "Failed to execute script");
                (false, ExecutionResult::error())
            }
        }
    }

    fn flush(&self, flush_cache: bool) {
        if flush_cache {
            if let Some(flush) = self.cache_flush {
                flush();
            }
        }
    }
}

/// First characters of `code` followed by `...`
pub(crate) fn excerpt(code: &str) -> String {
    let end = code
        .char_indices()
        .nth(CODE_EXCERPT_LEN)
        .map_or(code.len(), |(index, _)| index);
    format!("{}...", &code[..end])
}
