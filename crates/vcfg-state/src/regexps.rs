//! Compiled regexp cache

use crate::{Error, Result};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Cache of compiled patterns keyed by pattern text
#[derive(Debug, Default)]
pub struct RegexCache {
    patterns: RwLock<HashMap<String, Arc<Regex>>>,
}

impl RegexCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled pattern, compiling it on a miss
    ///
    /// With `use_cache` the compiled pattern is inserted (or an entry raced
    /// in by another thread is returned instead); without it the pattern is
    /// compiled privately and the cache is left untouched.
    pub fn compile_or_get(&self, pattern: &str, use_cache: bool) -> Result<Arc<Regex>> {
        if use_cache {
            if let Some(re) = self.patterns.read().get(pattern) {
                return Ok(Arc::clone(re));
            }
        }

        let compiled = Regex::new(pattern).map_err(|e| {
            error!(regexp = %pattern, error = %e, "Got error while compiling regexp");
            Error::Regex {
                pattern: pattern.to_string(),
                message: e.to_string(),
            }
        })?;
        let compiled = Arc::new(compiled);

        if !use_cache {
            return Ok(compiled);
        }

        let mut patterns = self.patterns.write();
        let entry = patterns
            .entry(pattern.to_string())
            .or_insert_with(|| {
                debug!(regexp = %pattern, "Caching compiled regexp");
                compiled
            });
        Ok(Arc::clone(entry))
    }

    /// Number of cached patterns
    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}

/// Substitute the first (or every) match of `re` in `subject`
///
/// `sub` uses the host syntax: `\0`..`\9` insert capture groups and `\\`
/// inserts a backslash. A subject without matches is returned unchanged.
pub fn regsub(re: &Regex, subject: &str, sub: &str, all: bool) -> String {
    let replacement = translate_substitution(sub);
    if all {
        re.replace_all(subject, replacement.as_str()).into_owned()
    } else {
        re.replace(subject, replacement.as_str()).into_owned()
    }
}

fn translate_substitution(sub: &str) -> String {
    let mut out = String::with_capacity(sub.len());
    let mut chars = sub.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    chars.next();
                    out.push_str("${");
                    out.push(d);
                    out.push('}');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            '$' => out.push_str("$$"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_returns_same_pattern() {
        let cache = RegexCache::new();
        let a = cache.compile_or_get("^foo", true).unwrap();
        let b = cache.compile_or_get("^foo", true).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_uncached_compile_leaves_cache_empty() {
        let cache = RegexCache::new();
        let re = cache.compile_or_get("bar$", false).unwrap();

        assert!(re.is_match("foobar"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        let cache = RegexCache::new();
        let err = cache.compile_or_get("(unclosed", true).unwrap_err();

        assert_eq!(err.to_string(), "Failed to instantiate '(unclosed' regexp.");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_regsub_groups() {
        let re = Regex::new(r"(\w+)@(\w+)").unwrap();

        assert_eq!(regsub(&re, "joe@example", r"\2:\1", false), "example:joe");
        assert_eq!(regsub(&re, "a@b c@d", r"<\0>", true), "<a@b> <c@d>");
        assert_eq!(regsub(&re, "a@b c@d", r"x", false), "x c@d");
        assert_eq!(regsub(&re, "nothing here", r"x", true), "nothing here");
    }

    #[test]
    fn test_regsub_literal_dollar_and_backslash() {
        let re = Regex::new("price").unwrap();

        assert_eq!(regsub(&re, "price", "$5", false), "$5");
        assert_eq!(regsub(&re, "price", r"a\\b", false), r"a\b");
    }
}
