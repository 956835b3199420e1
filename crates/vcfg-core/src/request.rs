//! Host request context exposed to scripts

use crate::error::{Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// In-flight HTTP object a script may address with `get_header` / `set_header`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpSlot {
    /// Client request
    Req,
    /// Top-level client request (ESI)
    ReqTop,
    /// Backend request
    Bereq,
    /// Backend response
    Beresp,
    /// Client response
    Resp,
    /// Cached object (read-only)
    Obj,
}

impl HttpSlot {
    /// Every slot, in declaration order
    pub const ALL: [HttpSlot; 6] = [
        Self::Req,
        Self::ReqTop,
        Self::Bereq,
        Self::Beresp,
        Self::Resp,
        Self::Obj,
    ];

    /// Name used by scripts to address this slot
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Req => "req",
            Self::ReqTop => "req-top",
            Self::Bereq => "bereq",
            Self::Beresp => "beresp",
            Self::Resp => "resp",
            Self::Obj => "obj",
        }
    }

    /// Whether scripts may modify headers in this slot
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::Obj)
    }
}

impl fmt::Display for HttpSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpSlot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| Error::Config(format!("Unknown HTTP object: {}", s)))
    }
}

#[derive(Debug, Default)]
struct ContextInner {
    slots: HashMap<HttpSlot, HeaderMap>,
    log: Vec<String>,
}

/// Handle on the request being processed by the host
///
/// Cheap to clone; clones share the same underlying slots. A slot that was
/// never attached is "unavailable" and header commands addressing it fail.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    inner: Arc<Mutex<ContextInner>>,
}

impl RequestContext {
    /// Create a context with no HTTP objects attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an HTTP object (builder style)
    pub fn with_slot(self, slot: HttpSlot, headers: HeaderMap) -> Self {
        self.attach(slot, headers);
        self
    }

    /// Attach or replace an HTTP object
    pub fn attach(&self, slot: HttpSlot, headers: HeaderMap) {
        self.inner.lock().slots.insert(slot, headers);
    }

    /// Detach an HTTP object, returning its headers
    pub fn detach(&self, slot: HttpSlot) -> Option<HeaderMap> {
        self.inner.lock().slots.remove(&slot)
    }

    /// Whether the given HTTP object is attached
    pub fn is_available(&self, slot: HttpSlot) -> bool {
        self.inner.lock().slots.contains_key(&slot)
    }

    /// Read a header from an attached HTTP object
    ///
    /// Returns `Ok(None)` when the header is absent. Values that are not
    /// visible ASCII are decoded lossily.
    pub fn header(&self, slot: HttpSlot, name: &str) -> Result<Option<String>> {
        let inner = self.inner.lock();
        let headers = inner
            .slots
            .get(&slot)
            .ok_or(Error::SlotUnavailable(slot))?;
        let name = HeaderName::from_bytes(name.as_bytes())?;
        Ok(headers
            .get(&name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned()))
    }

    /// Replace a header on an attached HTTP object
    pub fn set_header(&self, slot: HttpSlot, name: &str, value: &str) -> Result<()> {
        if !slot.is_writable() {
            return Err(Error::Config(format!("HTTP object '{}' is read-only", slot)));
        }
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        let mut inner = self.inner.lock();
        let headers = inner
            .slots
            .get_mut(&slot)
            .ok_or(Error::SlotUnavailable(slot))?;
        headers.insert(name, value);
        Ok(())
    }

    /// Snapshot of an attached HTTP object's headers
    pub fn headers(&self, slot: HttpSlot) -> Option<HeaderMap> {
        self.inner.lock().slots.get(&slot).cloned()
    }

    /// Append a line to the request log
    pub fn log<S: Into<String>>(&self, line: S) {
        let line = line.into();
        tracing::info!(target: "vcfg::vsl", "{}", line);
        self.inner.lock().log.push(line);
    }

    /// Lines logged against this request so far
    pub fn log_lines(&self) -> Vec<String> {
        self.inner.lock().log.clone()
    }
}
