//! Content-addressed function naming

use sha2::{Digest, Sha256};

/// Prefix of every generated function name
pub const FUNCTION_PREFIX: &str = "f_";

/// Name under which `source` is installed in an engine
///
/// Identical text always yields the same name, which is what lets an engine
/// skip recompiling a function it already holds.
pub fn function_name(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    format!("{}{:x}", FUNCTION_PREFIX, result)
}
