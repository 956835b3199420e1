//! Runtime selection and pooled engine instances

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bridge::Bridge;
use crate::config::ScriptConfig;
use crate::error::{Result, ScriptError};
use crate::library::Library;
use crate::lua_engine::{LuaInterpreter, LuaRuntime};
use crate::result::ExecutionResult;
use crate::rhai_engine::{RhaiInterpreter, RhaiRuntime};

/// Supported scripting languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Lua 5.4
    Lua,
    /// Rhai
    Rhai,
}

impl RuntimeKind {
    /// Language name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lua => "lua",
            Self::Rhai => "rhai",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lua" => Ok(Self::Lua),
            "rhai" => Ok(Self::Rhai),
            other => Err(ScriptError::invalid_config(format!(
                "unsupported engine '{}'",
                other
            ))),
        }
    }
}

/// Factory of sandboxed interpreters for one script
#[derive(Debug)]
pub(crate) enum Runtime {
    Lua(LuaRuntime),
    Rhai(RhaiRuntime),
}

impl Runtime {
    pub(crate) fn new(config: &ScriptConfig, bridge: Bridge, library: &Library) -> Self {
        match config.engine {
            RuntimeKind::Lua => Self::Lua(LuaRuntime::new(
                config.lua.clone(),
                config.enable_sandboxing,
                bridge,
            )),
            RuntimeKind::Rhai => Self::Rhai(RhaiRuntime::new(
                config.rhai.clone(),
                config.enable_sandboxing,
                bridge,
                library.rhai_packages(),
            )),
        }
    }

    pub(crate) fn kind(&self) -> RuntimeKind {
        match self {
            Self::Lua(_) => RuntimeKind::Lua,
            Self::Rhai(_) => RuntimeKind::Rhai,
        }
    }

    /// Create a fresh interpreter with the bridge installed
    pub(crate) fn create(&self) -> Result<Interpreter> {
        match self {
            Self::Lua(runtime) => runtime.create().map(Interpreter::Lua),
            Self::Rhai(runtime) => runtime.create().map(Interpreter::Rhai),
        }
    }
}

/// One interpreter instance
#[derive(Debug)]
pub(crate) enum Interpreter {
    Lua(LuaInterpreter),
    Rhai(RhaiInterpreter),
}

impl Interpreter {
    pub(crate) fn has_function(&self, name: &str) -> bool {
        match self {
            Self::Lua(lua) => lua.has_function(name),
            Self::Rhai(rhai) => rhai.has_function(name),
        }
    }

    /// Compile `code` as the body of a zero-parameter function `name`
    pub(crate) fn define_function(&mut self, name: &str, code: &str) -> Result<()> {
        match self {
            Self::Lua(lua) => lua.define_function(name, code),
            Self::Rhai(rhai) => rhai.define_function(name, code),
        }
    }

    /// Call a defined function with `argv` exposed as `ARGV`
    pub(crate) fn call_function(&mut self, name: &str, argv: &[String]) -> Result<ExecutionResult> {
        match self {
            Self::Lua(lua) => lua.call_function(name, argv),
            Self::Rhai(rhai) => rhai.call_function(name, argv),
        }
    }

    pub(crate) fn used_memory(&self) -> u64 {
        match self {
            Self::Lua(lua) => lua.used_memory(),
            Self::Rhai(rhai) => rhai.used_memory(),
        }
    }

    pub(crate) fn stack_depth(&self) -> usize {
        match self {
            Self::Lua(lua) => lua.stack_depth(),
            Self::Rhai(rhai) => rhai.stack_depth(),
        }
    }

    /// Full collection when `full`, otherwise one incremental step
    pub(crate) fn collect_garbage(&mut self, full: bool) -> Result<()> {
        match self {
            Self::Lua(lua) => lua.collect_garbage(full),
            Self::Rhai(rhai) => rhai.collect_garbage(full),
        }
    }
}

/// Interpreter owned by an [`EnginePool`](crate::EnginePool)
///
/// Engines are never shared: a checked-out engine belongs to exactly one
/// caller until it is checked back in.
#[derive(Debug)]
pub struct Engine {
    id: u64,
    kind: RuntimeKind,
    interpreter: Interpreter,
    cycles: u64,
    memory: u64,
}

impl Engine {
    pub(crate) fn new(id: u64, kind: RuntimeKind, interpreter: Interpreter) -> Self {
        let memory = interpreter.used_memory();
        Self {
            id,
            kind,
            interpreter,
            cycles: 0,
            memory,
        }
    }

    /// Pool-unique identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Language of the interpreter
    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    /// Executions served so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Memory in use, as of the last checkin
    pub fn memory(&self) -> u64 {
        self.memory
    }

    pub(crate) fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub(crate) fn interpreter_mut(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }

    /// Count one execution, returning the new total
    pub(crate) fn record_cycle(&mut self) -> u64 {
        self.cycles += 1;
        self.cycles
    }

    pub(crate) fn refresh_memory(&mut self) -> u64 {
        self.memory = self.interpreter.used_memory();
        self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_kind_parse() {
        assert_eq!("lua".parse::<RuntimeKind>().unwrap(), RuntimeKind::Lua);
        assert_eq!("Rhai".parse::<RuntimeKind>().unwrap(), RuntimeKind::Rhai);
        assert!("javascript".parse::<RuntimeKind>().is_err());
        assert_eq!(RuntimeKind::Rhai.to_string(), "rhai");
    }

    #[test]
    fn test_engine_cycles() {
        let library = Library::acquire();
        let config = ScriptConfig::default();
        let runtime = Runtime::new(&config, Bridge::new("test"), &library);
        let mut engine = Engine::new(7, runtime.kind(), runtime.create().unwrap());

        assert_eq!(engine.id(), 7);
        assert_eq!(engine.cycles(), 0);
        assert_eq!(engine.record_cycle(), 1);
        assert!(engine.memory() > 0);
        assert!(engine.refresh_memory() > 0);
    }
}
