//! Regexp rules: ordered `pattern -> value` lines matched first-wins
//!
//! Rules text has one rule per line. Blank lines are skipped, surrounding
//! whitespace is trimmed from both sides of the `->` separator, and the value
//! may be empty:
//!
//! ```text
//! ^/api/    -> backend-api
//! \.png$    -> static
//! .*        -> default
//! ```
//!
//! A rules object is fed by a [`ContentProvider`] like a script. A text with
//! any malformed line is rejected as a whole and the previous rules stay in
//! place.

use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{error, info, warn};
use vcfg_state::RegexCache;

use crate::error::{Result, ScriptError};
use crate::remote::ContentProvider;

const SEPARATOR: &str = "->";

/// One compiled rule
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: String,
    regex: Arc<Regex>,
    value: String,
}

impl Rule {
    /// Pattern text
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Value returned on a match
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether `subject` matches the pattern
    pub fn is_match(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }
}

/// Parse rules text, compiling patterns through `regexps`
pub fn parse_rules(contents: &str, regexps: &RegexCache) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let row = index + 1;
        let line = line.trim_start();
        if line.is_empty() {
            continue;
        }

        let Some((pattern, value)) = line.split_once(SEPARATOR) else {
            return Err(ScriptError::rules(row, "missing '->' separator"));
        };
        let pattern = pattern.trim_end();
        if pattern.is_empty() {
            return Err(ScriptError::rules(row, "empty regexp"));
        }

        let regex = regexps
            .compile_or_get(pattern, true)
            .map_err(|e| ScriptError::rules(row, e.to_string()))?;
        rules.push(Rule {
            pattern: pattern.to_string(),
            regex,
            value: value.trim().to_string(),
        });
    }

    Ok(rules)
}

#[derive(Debug, Default)]
struct RuleSet {
    source: Option<String>,
    rules: Vec<Rule>,
}

/// Rules object: maps a value to the first matching rule's value
#[derive(Debug)]
pub struct Rules {
    name: String,
    provider: Box<dyn ContentProvider>,
    regexps: RegexCache,
    current: RwLock<Arc<RuleSet>>,
}

impl Rules {
    /// Rules fed by `provider`, loaded once right away
    pub fn new<S, P>(name: S, provider: P) -> Self
    where
        S: Into<String>,
        P: ContentProvider + 'static,
    {
        let rules = Self {
            name: name.into(),
            provider: Box::new(provider),
            regexps: RegexCache::new(),
            current: RwLock::new(Arc::new(RuleSet::default())),
        };

        if !rules.check(true, false) {
            warn!(rules = %rules.name, "Rules not available after initial load");
        }
        info!(rules = %rules.name, count = rules.len(), "Rules created");
        rules
    }

    /// Rules name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Force a reload from the provider
    ///
    /// On failure the previous rules stay in place.
    pub fn reload(&self) -> bool {
        self.check(true, false)
    }

    /// Force a reload and write the backup file on success, even with
    /// automated backups disabled
    pub fn reload_and_backup(&self) -> bool {
        self.check(true, true)
    }

    /// Value of the first rule matching `value`, else `fallback`
    pub fn get(&self, value: &str, fallback: Option<&str>) -> Option<String> {
        self.check(false, false);

        let current = self.snapshot();
        current
            .rules
            .iter()
            .find(|rule| rule.is_match(value))
            .map(|rule| rule.value.clone())
            .or_else(|| fallback.map(str::to_string))
    }

    /// Source of the current rules, if any were loaded
    pub fn inspect(&self) -> Option<String> {
        self.check(false, false);
        self.snapshot().source.clone()
    }

    /// Number of current rules
    pub fn len(&self) -> usize {
        self.snapshot().rules.len()
    }

    /// Whether there are no current rules
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current rules in match order
    pub fn rules(&self) -> Vec<Rule> {
        self.snapshot().rules.clone()
    }

    fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }

    fn check(&self, force: bool, force_backup: bool) -> bool {
        self.provider
            .check_with_backup(force, force_backup, &mut |contents, is_backup| {
                self.accept(contents, is_backup)
            })
    }

    fn accept(&self, contents: &str, is_backup: bool) -> bool {
        let location = self.provider.location();
        match parse_rules(contents, &self.regexps) {
            Ok(rules) => {
                info!(
                    rules = %self.name,
                    location,
                    is_backup,
                    count = rules.len(),
                    "Remote successfully parsed"
                );
                *self.current.write() = Arc::new(RuleSet {
                    source: Some(contents.to_string()),
                    rules,
                });
                true
            }
            Err(e) => {
                error!(
                    rules = %self.name,
                    location,
                    is_backup,
                    error = %e,
                    "Failed to parse remote"
                );
                false
            }
        }
    }
}
