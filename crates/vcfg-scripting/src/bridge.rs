//! Host commands shared by every runtime
//!
//! Scripts reach the host through a small command surface (`log`,
//! `get_header`, `set_header`, `regmatch`, `regsub`, `shared.*`). The Lua
//! and Rhai bindings are thin adapters over [`Bridge`]; everything that
//! touches host state lives here.
//!
//! Per-call state (request context, task variables, eval lock) is kept in a
//! thread-local [`CallGuard`] scope that the execution core installs for the
//! duration of a call and tears down on every exit path.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::RwLockWriteGuard;
use tracing::{info, warn};
use vcfg_core::{HttpSlot, RequestContext};
use vcfg_state::{regsub, RegexCache, SharedStore, VarScope, Variables};

use crate::result::format_g;

/// Result of a host command; the error is raised inside the script
pub(crate) type CommandResult<T> = std::result::Result<T, String>;

/// Host state reachable from one script's engines
///
/// Cloning yields another handle on the same store and regexp cache.
#[derive(Debug, Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

#[derive(Debug)]
struct BridgeInner {
    script: String,
    store: SharedStore,
    regexps: RegexCache,
}

struct CallScope {
    ctx: Option<RequestContext>,
    task: Variables,
    locked: Option<Variables>,
}

thread_local! {
    static CALL_SCOPE: RefCell<Option<CallScope>> = const { RefCell::new(None) };
}

fn with_scope<R>(f: impl FnOnce(&mut CallScope) -> R) -> CommandResult<R> {
    CALL_SCOPE.with(|cell| {
        cell.borrow_mut()
            .as_mut()
            .map(f)
            .ok_or_else(|| "varnish commands are only available while executing".to_string())
    })
}

/// Installed call scope; dropping it hands the task variables back
pub(crate) struct CallGuard<'a> {
    task: &'a mut Variables,
    previous: Option<CallScope>,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let scope = CALL_SCOPE.with(|cell| std::mem::replace(&mut *cell.borrow_mut(), previous));
        if let Some(scope) = scope {
            *self.task = scope.task;
        }
    }
}

impl std::fmt::Debug for CallGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGuard").finish_non_exhaustive()
    }
}

/// Moves the locked global variables back under the store's write guard
struct Restore<'a> {
    guard: RwLockWriteGuard<'a, Variables>,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        let locked = CALL_SCOPE.with(|cell| {
            cell.borrow_mut()
                .as_mut()
                .and_then(|scope| scope.locked.take())
        });
        if let Some(variables) = locked {
            *self.guard = variables;
        }
    }
}

impl Bridge {
    /// Create a bridge with an empty store and regexp cache
    pub fn new<S: Into<String>>(script: S) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                script: script.into(),
                store: SharedStore::new(),
                regexps: RegexCache::new(),
            }),
        }
    }

    /// Name of the owning script
    pub fn script(&self) -> &str {
        &self.inner.script
    }

    /// Script-global variables
    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    /// Compiled regexps
    pub fn regexps(&self) -> &RegexCache {
        &self.inner.regexps
    }

    /// Install the per-call scope on the current thread
    ///
    /// The task variables are moved into the scope and restored when the
    /// guard is dropped.
    pub(crate) fn enter<'a>(
        &self,
        ctx: Option<RequestContext>,
        task: &'a mut Variables,
    ) -> CallGuard<'a> {
        let scope = CallScope {
            ctx,
            task: std::mem::take(task),
            locked: None,
        };
        let previous = CALL_SCOPE.with(|cell| cell.borrow_mut().replace(scope));
        CallGuard { task, previous }
    }

    /// `log(message)`
    pub(crate) fn log(&self, message: &str) -> CommandResult<()> {
        match with_scope(|scope| scope.ctx.clone())? {
            Some(ctx) => ctx.log(message),
            None => info!(script = %self.inner.script, "{}", message),
        }
        Ok(())
    }

    /// `get_header(name, where = "req")`
    pub(crate) fn get_header(&self, name: &str, location: Option<&str>) -> CommandResult<Option<String>> {
        let Some(slot) = parse_slot(location) else {
            return Ok(None);
        };
        if name.is_empty() {
            return Ok(None);
        }

        let unavailable =
            || format!("varnish.get_header() called over unavailable '{}' object.", slot);
        let ctx = with_scope(|scope| scope.ctx.clone())?.ok_or_else(unavailable)?;
        match ctx.header(slot, name) {
            Ok(value) => Ok(value),
            Err(vcfg_core::Error::SlotUnavailable(_)) => Err(unavailable()),
            Err(_) => Ok(None),
        }
    }

    /// `set_header(name, value, where = "req")`
    pub(crate) fn set_header(&self, name: &str, value: &str, location: Option<&str>) -> CommandResult<()> {
        let Some(slot) = parse_slot(location).filter(HttpSlot::is_writable) else {
            return Ok(());
        };
        if name.is_empty() || value.is_empty() {
            return Ok(());
        }

        let unavailable =
            || format!("varnish.set_header() called over unavailable '{}' object.", slot);
        let ctx = with_scope(|scope| scope.ctx.clone())?.ok_or_else(unavailable)?;
        match ctx.set_header(slot, name, value) {
            Ok(()) => Ok(()),
            Err(vcfg_core::Error::SlotUnavailable(_)) => Err(unavailable()),
            Err(e) => {
                warn!(script = %self.inner.script, header = %name, error = %e, "Ignoring invalid header");
                Ok(())
            }
        }
    }

    /// `regmatch(string, pattern, cache = true)`
    pub(crate) fn regmatch(&self, subject: &str, pattern: &str, cache: bool) -> CommandResult<bool> {
        let re = self
            .inner
            .regexps
            .compile_or_get(pattern, cache)
            .map_err(|e| e.to_string())?;
        Ok(re.is_match(subject))
    }

    /// `regsub(string, pattern, sub, cache = true)` and `regsuball(...)`
    pub(crate) fn regsub(
        &self,
        subject: &str,
        pattern: &str,
        sub: &str,
        cache: bool,
        all: bool,
    ) -> CommandResult<String> {
        let re = self
            .inner
            .regexps
            .compile_or_get(pattern, cache)
            .map_err(|e| e.to_string())?;
        Ok(regsub(&re, subject, sub, all))
    }

    /// `shared.get(key, scope = "all")`
    pub(crate) fn shared_get(&self, key: &str, scope: Option<&str>) -> CommandResult<Option<String>> {
        let scope = parse_scope(scope, VarScope::All)?;
        if key.is_empty() {
            return Ok(None);
        }

        let store = &self.inner.store;
        with_scope(|call| {
            if scope.includes_task() {
                if let Some(value) = call.task.get(key) {
                    return Some(value.to_string());
                }
            }
            if !scope.includes_global() {
                return None;
            }
            match &call.locked {
                Some(locked) => locked.get(key).map(str::to_string),
                None => store.get(key),
            }
        })
    }

    /// `shared.set(key, value, scope = "task")`
    pub(crate) fn shared_set(&self, key: &str, value: &str, scope: Option<&str>) -> CommandResult<()> {
        let scope = parse_scope(scope, VarScope::Task)?;
        if key.is_empty() || value.is_empty() {
            return Ok(());
        }

        let store = &self.inner.store;
        with_scope(|call| {
            if scope.includes_task() {
                call.task.set(key, value);
            }
            if scope.includes_global() {
                match &mut call.locked {
                    Some(locked) => locked.set(key, value),
                    None => store.set(key, value),
                }
            }
        })
    }

    /// `shared.unset(key, scope = "all")`
    pub(crate) fn shared_unset(&self, key: &str, scope: Option<&str>) -> CommandResult<()> {
        let scope = parse_scope(scope, VarScope::All)?;
        if key.is_empty() {
            return Ok(());
        }

        let store = &self.inner.store;
        with_scope(|call| {
            if scope.includes_task() {
                call.task.unset(key);
            }
            if scope.includes_global() {
                match &mut call.locked {
                    Some(locked) => {
                        locked.unset(key);
                    }
                    None => {
                        store.unset(key);
                    }
                }
            }
        })
    }

    /// `shared.eval(closure)`
    ///
    /// Runs `f` holding the store's write lock. Nested calls (and the
    /// `shared.*` commands issued by `f`) reuse the held lock.
    pub(crate) fn shared_eval<T>(&self, f: impl FnOnce() -> T) -> CommandResult<T> {
        if with_scope(|call| call.locked.is_some())? {
            return Ok(f());
        }

        let mut guard = self.inner.store.lock();
        let variables = std::mem::take(&mut *guard);
        with_scope(|call| call.locked = Some(variables))?;
        let restore = Restore { guard };
        let result = f();
        drop(restore);
        Ok(result)
    }

    /// `shared.incr(key, increment = 0, scope)`
    pub(crate) fn shared_incr(&self, key: &str, increment: f64, scope: Option<&str>) -> CommandResult<f64> {
        self.shared_eval(|| -> CommandResult<f64> {
            let current = self
                .shared_get(key, scope)?
                .and_then(|value| value.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            let total = current + increment;
            self.shared_set(key, &number_to_text(total), scope)?;
            Ok(total)
        })?
    }
}

fn parse_slot(location: Option<&str>) -> Option<HttpSlot> {
    location.unwrap_or("req").parse().ok()
}

fn parse_scope(scope: Option<&str>, default: VarScope) -> CommandResult<VarScope> {
    match scope.filter(|s| !s.is_empty()) {
        Some(scope) => scope.parse().map_err(|e: vcfg_state::Error| e.to_string()),
        None => Ok(default),
    }
}

/// Text form of a number stored in a shared variable
pub(crate) fn number_to_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format_g(value, 14)
    }
}
