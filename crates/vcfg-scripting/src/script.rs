//! Script objects: configured engine pools fed by a content provider

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use vcfg_core::RequestContext;
use vcfg_state::SharedStore;

use crate::config::ScriptConfig;
use crate::error::Result;
use crate::executor::{excerpt, Call, ExecutionCore};
use crate::library::Library;
use crate::registry::function_name;
use crate::remote::ContentProvider;
use crate::result::ExecutionResult;
use crate::stats::{
    CurrentStats, DroppedStats, EngineStats, ExecutionStats, StatsSnapshot, WorkerStats,
};
use crate::task::{TaskState, MAX_EXECUTION_ARGS};

/// Last successfully compiled provider content
#[derive(Debug)]
struct CurrentFunction {
    code: String,
    name: String,
}

/// Long-lived script object
///
/// Owns the engine pool, the shared variables and regexp cache its scripts
/// see, and the current function published by its content provider. Per
/// request work goes through a [`TaskState`] and the `init` / `push` /
/// `execute` calls.
#[derive(Debug)]
pub struct Script {
    name: String,
    config: ScriptConfig,
    provider: Option<Box<dyn ContentProvider>>,
    core: ExecutionCore,
    current: Mutex<Option<Arc<CurrentFunction>>>,
    _library: Arc<Library>,
}

impl Script {
    /// Script without a provider; only ad-hoc code given to `init` runs
    pub fn new<S: Into<String>>(name: S, config: ScriptConfig) -> Result<Self> {
        Self::build(name.into(), config, None)
    }

    /// Script fed by `provider`, loaded once right away
    pub fn with_provider<S, P>(name: S, config: ScriptConfig, provider: P) -> Result<Self>
    where
        S: Into<String>,
        P: ContentProvider + 'static,
    {
        Self::build(name.into(), config, Some(Box::new(provider)))
    }

    fn build(
        name: String,
        config: ScriptConfig,
        provider: Option<Box<dyn ContentProvider>>,
    ) -> Result<Self> {
        config.validate()?;

        let library = Library::acquire();
        let core = ExecutionCore::new(&name, &config, &library);
        let script = Self {
            name,
            config,
            provider,
            core,
            current: Mutex::new(None),
            _library: library,
        };

        if !script.check(true, false) {
            warn!(script = %script.name, "Script content not available after initial load");
        }
        info!(
            script = %script.name,
            engine = %script.config.engine,
            max_engines = script.config.max_engines,
            "Script created"
        );
        Ok(script)
    }

    /// Hook run after executions that ask for a thread-cache flush
    pub fn with_cache_flush(mut self, flush: fn()) -> Self {
        self.core.set_cache_flush(flush);
        self
    }

    /// Script name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime configuration
    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Script-global shared variables
    pub fn store(&self) -> &SharedStore {
        self.core.bridge().store()
    }

    /// Source of the current function, if any was loaded
    pub fn inspect(&self) -> Option<String> {
        self.current().map(|function| function.code.clone())
    }

    fn current(&self) -> Option<Arc<CurrentFunction>> {
        self.current.lock().clone()
    }

    /// Force a reload from the provider
    ///
    /// On failure the previous function stays in place.
    pub fn reload(&self) -> bool {
        self.check(true, false)
    }

    /// Force a reload and write the backup file on success, even with
    /// automated backups disabled
    pub fn reload_and_backup(&self) -> bool {
        self.check(true, true)
    }

    fn check(&self, force: bool, force_backup: bool) -> bool {
        match &self.provider {
            Some(provider) => provider.check_with_backup(force, force_backup, &mut |contents, is_backup| {
                self.accept(provider.location(), contents, is_backup)
            }),
            None => true,
        }
    }

    fn accept(&self, location: &str, contents: &str, is_backup: bool) -> bool {
        let name = function_name(contents);
        let execution = self.core.execute(contents, Some(&name), None, false, true);
        if !execution.success {
            error!(
                script = %self.name,
                location,
                is_backup,
                code = %excerpt(contents),
                "Failed to compile remote"
            );
            return false;
        }

        info!(
            script = %self.name,
            location,
            is_backup,
            function = %name,
            code = %excerpt(contents),
            "Remote successfully compiled"
        );
        *self.current.lock() = Some(Arc::new(CurrentFunction {
            code: contents.to_string(),
            name,
        }));
        true
    }

    /// Start a new invocation; empty or absent `code` runs the current
    /// function
    pub fn init(&self, task: &mut TaskState, code: Option<&str>) {
        task.reset(code);
    }

    /// Append an argument (`None` becomes an empty string)
    pub fn push(&self, task: &mut TaskState, arg: Option<&str>) -> bool {
        let pushed = task.push_arg(arg.unwrap_or(""));
        if !pushed {
            error!(script = %self.name, limit = MAX_EXECUTION_ARGS, "Failed to push argument");
        }
        pushed
    }

    /// Run the initialized invocation, storing its result in `task`
    pub fn execute(
        &self,
        task: &mut TaskState,
        ctx: Option<&RequestContext>,
        gc_collect: bool,
        flush_cache: bool,
    ) -> bool {
        if !task.is_initialized() {
            debug!(script = %self.name, "Execute called before init");
            return false;
        }

        let function = match task.code() {
            Some(code) => Arc::new(CurrentFunction {
                code: code.to_string(),
                name: function_name(code),
            }),
            None => {
                self.check(false, false);
                match self.current() {
                    Some(function) => function,
                    None => {
                        error!(script = %self.name, "Code not available when trying to execute script");
                        task.set_result(ExecutionResult::error());
                        return false;
                    }
                }
            }
        };

        let (argv, variables) = task.args_and_variables();
        let call = Call {
            argv,
            ctx: ctx.cloned(),
            variables,
        };
        let execution = self.core.execute(
            &function.code,
            Some(&function.name),
            Some(call),
            gc_collect,
            flush_cache,
        );

        if !execution.success {
            error!(
                script = %self.name,
                function = %execution.name,
                code = %excerpt(&function.code),
                "Got error while executing script"
            );
        }
        task.set_result(execution.result);
        execution.success
    }

    /// Drop the invocation state of `task`
    pub fn free_result(&self, task: &mut TaskState) {
        task.clear();
    }

    /// Current statistics
    pub fn snapshot(&self) -> StatsSnapshot {
        let pool = self.core.pool().snapshot();
        let bridge = self.core.bridge();
        let stats = self.core.stats();

        StatsSnapshot {
            engines: EngineStats {
                current: pool.total as u64,
                total: stats.engines_total(),
                memory: pool.memory,
                dropped: DroppedStats {
                    cycles: stats.engines_dropped_cycles(),
                },
            },
            regexps: CurrentStats {
                current: bridge.regexps().len() as u64,
            },
            variables: CurrentStats {
                current: bridge.store().len() as u64,
            },
            workers: WorkerStats {
                blocked: stats.workers_blocked(),
            },
            executions: ExecutionStats {
                total: stats.executions_total(),
                unknown: stats.executions_unknown(),
                failed: stats.executions_failed(),
                gc: stats.executions_gc(),
            },
        }
    }

    /// Statistics as a JSON document
    pub fn stats(&self) -> String {
        self.snapshot().to_json()
    }

    /// One statistics counter by dotted name, 0 if unknown
    pub fn counter(&self, name: &str) -> u64 {
        self.snapshot().counter(name).unwrap_or_else(|| {
            error!(script = %self.name, name, "Failed to fetch counter");
            0
        })
    }
}
