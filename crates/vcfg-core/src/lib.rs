//! # vcfg core
//!
//! Types shared by every vcfg crate:
//! - [`Error`] / [`Result`] used by configuration and request plumbing
//! - [`HttpSlot`], the in-flight HTTP objects a script may address
//! - [`RequestContext`], the host handle passed through every script call

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod request;

pub use error::{Error, Result};
pub use request::{HttpSlot, RequestContext};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::request::{HttpSlot, RequestContext};
}
