//! # vcfg Configuration
//!
//! Declares the script and rules objects of a vcfg deployment in one file:
//!
//! ```yaml
//! scripts:
//!   - name: router
//!     remote:
//!       location: "file:///etc/varnish/router.lua"
//!       period: "60s"
//!     settings:
//!       max_engines: 32
//! rules:
//!   - name: backends
//!     remote:
//!       location: "${RULES_URL:-file:///etc/varnish/backends.rules}"
//! logging:
//!   level: info
//! ```
//!
//! YAML, TOML and JSON are accepted (picked by file extension) and
//! `${VAR}` / `${VAR:-default}` references are expanded before parsing.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod builder;
pub mod format;
pub mod loader;
pub mod types;
pub mod validator;

pub use builder::ConfigBuilder;
pub use format::ConfigFormat;
pub use loader::{load_config, load_from_file, load_from_str};
pub use types::{Config, LoggingConfig, RulesDefinition, ScriptDefinition};
pub use validator::validate_config;

use std::path::Path;
use vcfg_core::Result;

/// Load and validate configuration from a file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    load_config(path)
}

/// Load configuration from a string
pub fn load_str(content: &str, format: ConfigFormat) -> Result<Config> {
    load_from_str(content, format)
}
