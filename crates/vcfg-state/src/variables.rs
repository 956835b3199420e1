//! Shared key/value variables

use crate::{Error, Result};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

/// Partition of the variable namespace addressed by `varnish.shared.*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarScope {
    /// Variables private to the current task (request)
    Task,
    /// Variables shared by every task using the same script
    Global,
    /// Task first, then global (reads); both (removals)
    All,
}

impl VarScope {
    /// Scope name as spelled by scripts
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Global => "global",
            Self::All => "all",
        }
    }

    /// Whether the task partition is addressed
    pub fn includes_task(&self) -> bool {
        matches!(self, Self::Task | Self::All)
    }

    /// Whether the global partition is addressed
    pub fn includes_global(&self) -> bool {
        matches!(self, Self::Global | Self::All)
    }
}

impl fmt::Display for VarScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VarScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "task" => Ok(Self::Task),
            "global" => Ok(Self::Global),
            "all" => Ok(Self::All),
            other => Err(Error::InvalidScope(other.to_string())),
        }
    }
}

/// Ordered set of string variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    entries: BTreeMap<String, String>,
}

impl Variables {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Insert or replace a variable
    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.entries.insert(key.into(), value.into());
    }

    /// Remove a variable, returning its previous value
    pub fn unset(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every variable
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Script-global variables behind a read/write lock
///
/// Cloning yields another handle on the same store.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<Variables>>,
}

impl SharedStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a variable under the read lock
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.read().get(key).map(str::to_string)
    }

    /// Write a variable under the write lock
    pub fn set<K: Into<String>, V: Into<String>>(&self, key: K, value: V) {
        let key = key.into();
        trace!(key = %key, "Setting shared variable");
        self.inner.write().set(key, value);
    }

    /// Remove a variable under the write lock
    pub fn unset(&self, key: &str) -> Option<String> {
        trace!(key = %key, "Unsetting shared variable");
        self.inner.write().unset(key)
    }

    /// Number of stored variables
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Hold the write lock for a composite read-modify-write
    ///
    /// Every other accessor blocks until the returned guard is dropped.
    pub fn lock(&self) -> RwLockWriteGuard<'_, Variables> {
        self.inner.write()
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Variables {
        self.inner.read().clone()
    }
}
