//! # vcfg scripting
//!
//! Pooled execution of sandboxed scripts published by live configuration.
//!
//! ## Supported Languages
//!
//! - **Lua** (5.4) - strict globals, read-only `varnish` bridge table
//! - **Rhai** - strict variables, operation limits, `varnish::` module
//!
//! ## Features
//!
//! - Bounded engine pool with blocking backpressure and cycle-based retirement
//! - Content-addressed function names (`f_<sha256>`), compiled lazily per engine
//! - Typed result marshalling (nil, boolean, number, string, tables of those)
//! - Garbage-collection pacing
//! - Hot reload from `file://` or `http(s)://` locations with on-disk backups
//! - Regexp rules objects (`pattern -> value`, first match wins) on the same
//!   providers
//!
//! ## Example
//!
//! ```rust,no_run
//! use vcfg_scripting::prelude::*;
//!
//! let script = Script::new("demo", ScriptConfig::default()).unwrap();
//! let mut task = TaskState::new();
//!
//! script.init(&mut task, Some("return ARGV[0] .. '!'"));
//! script.push(&mut task, Some("hello"));
//! script.execute(&mut task, None, false, false);
//!
//! assert_eq!(task.get_string_result(), Some("hello!"));
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod library;
pub mod lua_engine;
pub mod pool;
pub mod registry;
pub mod remote;
pub mod result;
pub mod rhai_engine;
pub mod rules;
pub mod script;
pub mod stats;
pub mod task;

pub use config::{LuaOptions, RhaiOptions, ScriptConfig};
pub use engine::{Engine, RuntimeKind};
pub use error::{Result, ScriptError};
pub use pool::{EnginePool, PoolSnapshot, PooledEngine};
pub use registry::function_name;
pub use remote::{ContentProvider, Fetched, InlineSource, Remote, RemoteConfig};
pub use result::{ExecutionResult, ResultValue, MAX_RESULT_VALUES};
pub use rules::{parse_rules, Rule, Rules};
pub use script::Script;
pub use stats::{ScriptStats, StatsSnapshot};
pub use task::{TaskState, MAX_EXECUTION_ARGS};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::config::{LuaOptions, RhaiOptions, ScriptConfig};
    pub use crate::engine::RuntimeKind;
    pub use crate::error::{Result, ScriptError};
    pub use crate::remote::{ContentProvider, InlineSource, Remote, RemoteConfig};
    pub use crate::result::{ExecutionResult, ResultValue};
    pub use crate::rules::Rules;
    pub use crate::script::Script;
    pub use crate::task::TaskState;
    pub use vcfg_core::{HttpSlot, RequestContext};
}
