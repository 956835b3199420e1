//! Script object configuration

use crate::engine::RuntimeKind;
use crate::error::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration of a script object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Interpreter used by every engine of the script (default: lua)
    #[serde(default = "default_engine")]
    pub engine: RuntimeKind,

    /// Upper bound of live engines (default: 128)
    #[serde(default = "default_max_engines")]
    pub max_engines: usize,

    /// Executions after which an engine is retired, 0 = never (default: 0)
    #[serde(default)]
    pub max_cycles: u64,

    /// An incremental collection runs every this many executions (default: 100)
    #[serde(default = "default_min_gc_cycles")]
    pub min_gc_cycles: u64,

    /// Restrict globals and make the bridge table read-only (default: true)
    #[serde(default = "default_true")]
    pub enable_sandboxing: bool,

    /// Give up waiting for a free engine after this long (default: wait forever)
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub checkout_timeout: Option<Duration>,

    /// Lua specific settings
    #[serde(default)]
    pub lua: LuaOptions,

    /// Rhai specific settings
    #[serde(default)]
    pub rhai: RhaiOptions,
}

fn default_engine() -> RuntimeKind {
    RuntimeKind::Lua
}

fn default_max_engines() -> usize {
    128
}

fn default_min_gc_cycles() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            max_engines: default_max_engines(),
            max_cycles: 0,
            min_gc_cycles: default_min_gc_cycles(),
            enable_sandboxing: true,
            checkout_timeout: None,
            lua: LuaOptions::default(),
            rhai: RhaiOptions::default(),
        }
    }
}

impl ScriptConfig {
    /// Select the interpreter
    pub fn with_engine(mut self, engine: RuntimeKind) -> Self {
        self.engine = engine;
        self
    }

    /// Set the engine pool capacity
    pub fn with_max_engines(mut self, max_engines: usize) -> Self {
        self.max_engines = max_engines;
        self
    }

    /// Set the retirement budget
    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Set the collection pacing
    pub fn with_min_gc_cycles(mut self, min_gc_cycles: u64) -> Self {
        self.min_gc_cycles = min_gc_cycles;
        self
    }

    /// Enable or disable sandboxing
    pub fn with_sandboxing(mut self, enabled: bool) -> Self {
        self.enable_sandboxing = enabled;
        self
    }

    /// Bound the time spent waiting for a free engine
    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = Some(timeout);
        self
    }

    /// Replace the Lua settings
    pub fn with_lua(mut self, lua: LuaOptions) -> Self {
        self.lua = lua;
        self
    }

    /// Replace the Rhai settings
    pub fn with_rhai(mut self, rhai: RhaiOptions) -> Self {
        self.rhai = rhai;
        self
    }

    /// Reject values the pool and collector cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_engines == 0 {
            return Err(ScriptError::invalid_config("max_engines must be > 0"));
        }
        if self.min_gc_cycles == 0 {
            return Err(ScriptError::invalid_config("min_gc_cycles must be > 0"));
        }
        if self.lua.gc_step_size == 0 {
            return Err(ScriptError::invalid_config("lua.gc_step_size must be > 0"));
        }
        if self.rhai.max_operations == 0 {
            return Err(ScriptError::invalid_config("rhai.max_operations must be > 0"));
        }
        if let Some(timeout) = self.checkout_timeout {
            if timeout.is_zero() {
                return Err(ScriptError::invalid_config("checkout_timeout must be > 0"));
            }
        }
        Ok(())
    }
}

/// Lua interpreter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuaOptions {
    /// Size (KiB) of each paced incremental collection step (default: 100)
    #[serde(default = "default_gc_step_size")]
    pub gc_step_size: u32,

    /// Keep the `loadfile` builtin
    #[serde(default)]
    pub enable_loadfile: bool,

    /// Keep the `dofile` builtin
    #[serde(default)]
    pub enable_dofile: bool,

    /// Load the `package` library
    #[serde(default)]
    pub enable_package_lib: bool,

    /// Load the `io` library
    #[serde(default)]
    pub enable_io_lib: bool,

    /// Load the `os` library
    #[serde(default)]
    pub enable_os_lib: bool,
}

fn default_gc_step_size() -> u32 {
    100
}

impl Default for LuaOptions {
    fn default() -> Self {
        Self {
            gc_step_size: default_gc_step_size(),
            enable_loadfile: false,
            enable_dofile: false,
            enable_package_lib: false,
            enable_io_lib: false,
            enable_os_lib: false,
        }
    }
}

/// Rhai interpreter limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RhaiOptions {
    /// Maximum operations per call (default: 1,000,000)
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    /// Maximum function call nesting (default: 64)
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    /// Maximum expression nesting (default: 64)
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    /// Maximum string length in bytes (default: 1MB)
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    /// Maximum array length (default: 10,000)
    #[serde(default = "default_max_collection_size")]
    pub max_array_size: usize,

    /// Maximum object map size (default: 10,000)
    #[serde(default = "default_max_collection_size")]
    pub max_map_size: usize,
}

fn default_max_operations() -> u64 {
    1_000_000
}

fn default_max_call_levels() -> usize {
    64
}

fn default_max_expr_depth() -> usize {
    64
}

fn default_max_string_size() -> usize {
    1024 * 1024
}

fn default_max_collection_size() -> usize {
    10_000
}

impl Default for RhaiOptions {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_collection_size(),
            max_map_size: default_max_collection_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScriptConfig::default();
        assert_eq!(config.engine, RuntimeKind::Lua);
        assert_eq!(config.max_engines, 128);
        assert_eq!(config.max_cycles, 0);
        assert_eq!(config.min_gc_cycles, 100);
        assert!(config.enable_sandboxing);
        assert_eq!(config.lua.gc_step_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ScriptConfig = serde_json::from_str(
            r#"{"engine": "rhai", "max_engines": 4, "checkout_timeout": "250ms", "lua": {"enable_os_lib": true}}"#,
        )
        .unwrap();

        assert_eq!(config.engine, RuntimeKind::Rhai);
        assert_eq!(config.max_engines, 4);
        assert_eq!(config.checkout_timeout, Some(Duration::from_millis(250)));
        assert!(config.lua.enable_os_lib);
        assert_eq!(config.lua.gc_step_size, 100);
        assert_eq!(config.min_gc_cycles, 100);
    }

    #[test]
    fn test_validation() {
        assert!(ScriptConfig::default().with_max_engines(0).validate().is_err());
        assert!(ScriptConfig::default().with_min_gc_cycles(0).validate().is_err());
        assert!(ScriptConfig::default()
            .with_checkout_timeout(Duration::ZERO)
            .validate()
            .is_err());

        let mut lua = LuaOptions::default();
        lua.gc_step_size = 0;
        assert!(ScriptConfig::default().with_lua(lua).validate().is_err());
    }
}
