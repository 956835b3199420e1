//! # vcfg state
//!
//! Process-memory state shared by every engine of a script:
//! - **Variables**: string key/value store, task-local or script-global
//! - **Regexps**: compiled pattern cache used by `regmatch` / `regsub`
//!
//! Both are multi-reader / single-writer and only mutated through the
//! accessor methods defined here.
//!
//! ## Example
//!
//! ```rust
//! use vcfg_state::{RegexCache, SharedStore};
//!
//! let store = SharedStore::new();
//! store.set("hits", "1");
//! assert_eq!(store.get("hits").as_deref(), Some("1"));
//!
//! let regexps = RegexCache::new();
//! let re = regexps.compile_or_get("^/api/", true).unwrap();
//! assert!(re.is_match("/api/users"));
//! assert_eq!(regexps.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod error;
mod regexps;
mod variables;

pub use error::{Error, Result};
pub use regexps::{regsub, RegexCache};
pub use variables::{SharedStore, VarScope, Variables};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::regexps::{regsub, RegexCache};
    pub use crate::variables::{SharedStore, VarScope, Variables};
}
