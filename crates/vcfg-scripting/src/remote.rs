//! Content providers
//!
//! A provider hands text to its [`Script`](crate::Script) or
//! [`Rules`](crate::Rules) when a (re)load is due. [`Remote`] reads `file://` paths or `http(s)://` URLs,
//! reloads periodically and keeps an on-disk backup of the last good
//! contents; [`InlineSource`] serves fixed text.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Result, ScriptError};

/// Source of script text
pub trait ContentProvider: Send + Sync + fmt::Debug {
    /// Where the content comes from (for logs)
    fn location(&self) -> &str;

    /// Load the content if forced or due, passing it to `accept`
    ///
    /// `accept(contents, is_backup)` returns whether the text was taken.
    /// Returns `true` when nothing was due, otherwise whether some content
    /// (primary or backup) was accepted.
    fn check(&self, force: bool, accept: &mut dyn FnMut(&str, bool) -> bool) -> bool;

    /// Like [`check`](Self::check), but with `force_backup` the accepted
    /// primary content is written to the backup file even when automated
    /// backups are disabled
    ///
    /// Providers without a backup file ignore the flag.
    fn check_with_backup(
        &self,
        force: bool,
        _force_backup: bool,
        accept: &mut dyn FnMut(&str, bool) -> bool,
    ) -> bool {
        self.check(force, accept)
    }
}

/// Fixed script text
#[derive(Debug, Clone)]
pub struct InlineSource {
    contents: String,
}

impl InlineSource {
    /// Wrap `contents`
    pub fn new<S: Into<String>>(contents: S) -> Self {
        Self {
            contents: contents.into(),
        }
    }
}

impl ContentProvider for InlineSource {
    fn location(&self) -> &str {
        "inline"
    }

    fn check(&self, force: bool, accept: &mut dyn FnMut(&str, bool) -> bool) -> bool {
        if !force {
            return true;
        }
        !self.contents.is_empty() && accept(&self.contents, false)
    }
}

/// Remote location settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// `file://<path>`, `http://...`, `https://...` or a bare path
    pub location: String,

    /// Reload period, 0 = forced reloads only (default: 60s)
    #[serde(default = "default_period", with = "humantime_serde")]
    pub period: Duration,

    /// Backup file read when the location is broken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,

    /// Write the backup file after every successful load (default: true)
    #[serde(default = "default_true")]
    pub automated_backups: bool,

    /// HTTP connection timeout
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub connection_timeout: Option<Duration>,

    /// HTTP transfer timeout
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub transfer_timeout: Option<Duration>,

    /// Verify the server certificate (default: true)
    #[serde(default = "default_true")]
    pub verify_peer: bool,

    /// Verify the server host name (default: true)
    #[serde(default = "default_true")]
    pub verify_host: bool,

    /// Extra PEM CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    /// Proxy URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_period() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

impl RemoteConfig {
    /// Settings for `location` with defaults
    pub fn new<S: Into<String>>(location: S) -> Self {
        Self {
            location: location.into(),
            period: default_period(),
            backup: None,
            automated_backups: true,
            connection_timeout: None,
            transfer_timeout: None,
            verify_peer: true,
            verify_host: true,
            ca_file: None,
            proxy: None,
        }
    }

    /// Set the reload period
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the backup file
    pub fn with_backup<P: Into<PathBuf>>(mut self, backup: P) -> Self {
        self.backup = Some(backup.into());
        self
    }

    /// Enable or disable automated backups
    pub fn with_automated_backups(mut self, enabled: bool) -> Self {
        self.automated_backups = enabled;
        self
    }

    /// Set the HTTP timeouts
    pub fn with_timeouts(mut self, connection: Duration, transfer: Duration) -> Self {
        self.connection_timeout = Some(connection);
        self.transfer_timeout = Some(transfer);
        self
    }

    /// Set the proxy URL
    pub fn with_proxy<S: Into<String>>(mut self, proxy: S) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// Content handed to the caller by [`Remote::fetch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Loaded text
    pub contents: String,
    /// Whether it came from the backup file
    pub is_backup: bool,
}

#[derive(Debug)]
enum Target {
    Path(PathBuf),
    Url {
        url: String,
        client: reqwest::blocking::Client,
    },
}

#[derive(Debug, Default)]
struct RemoteState {
    loaded_at: Option<Instant>,
    reloading: bool,
    contents: Option<String>,
}

/// Periodically reloaded remote content with an on-disk backup
#[derive(Debug)]
pub struct Remote {
    config: RemoteConfig,
    target: Target,
    state: Mutex<RemoteState>,
}

impl Remote {
    /// Parse the location and prepare the HTTP client if needed
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let location = config.location.as_str();
        let target = if let Some(path) = location.strip_prefix("file://") {
            Target::Path(PathBuf::from(path))
        } else if location.starts_with("http://") || location.starts_with("https://") {
            Target::Url {
                url: location.to_string(),
                client: build_client(&config)?,
            }
        } else {
            Target::Path(PathBuf::from(location))
        };

        Ok(Self {
            config,
            target,
            state: Mutex::new(RemoteState::default()),
        })
    }

    /// Settings
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Last accepted contents
    pub fn contents(&self) -> Option<String> {
        self.state.lock().contents.clone()
    }

    /// Load the content if forced or due, accepting whatever was read
    pub fn fetch(&self, force: bool) -> Option<Fetched> {
        let mut fetched = None;
        self.check(force, &mut |contents, is_backup| {
            fetched = Some(Fetched {
                contents: contents.to_string(),
                is_backup,
            });
            true
        });
        fetched
    }

    fn claim_reload(&self) -> bool {
        if self.config.period.is_zero() {
            return false;
        }
        let mut state = self.state.lock();
        let due = state
            .loaded_at
            .map_or(true, |at| at.elapsed() > self.config.period);
        if due && !state.reloading {
            state.reloading = true;
            true
        } else {
            false
        }
    }

    fn read(&self) -> Result<String> {
        match &self.target {
            Target::Path(path) => read_file(&self.config.location, path),
            Target::Url { url, client } => {
                let response = client
                    .get(url.as_str())
                    .send()
                    .map_err(|e| ScriptError::remote(&self.config.location, e.to_string()))?;
                let status = response.status();
                if status != reqwest::StatusCode::OK {
                    return Err(ScriptError::remote(
                        &self.config.location,
                        format!("status={}", status.as_u16()),
                    ));
                }
                response
                    .text()
                    .map_err(|e| ScriptError::remote(&self.config.location, e.to_string()))
            }
        }
    }

    fn store(&self, contents: String) {
        self.state.lock().contents = Some(contents);
    }

    fn write_backup(&self, contents: &str, force_backup: bool) {
        let Some(backup) = &self.config.backup else {
            return;
        };
        if !self.config.automated_backups && !force_backup {
            info!(location = %self.config.location, backup = %backup.display(), "Automated backups are disabled");
            return;
        }
        match fs::write(backup, contents) {
            Ok(()) => debug!(location = %self.config.location, backup = %backup.display(), "Backup file written"),
            Err(e) => error!(
                location = %self.config.location,
                backup = %backup.display(),
                error = %e,
                "Failed to write backup file"
            ),
        }
    }

    fn check_backup(&self, backup: &Path, accept: &mut dyn FnMut(&str, bool) -> bool) -> bool {
        let usable = fs::metadata(backup).map(|m| m.len() > 0).unwrap_or(false);
        if !usable {
            error!(
                location = %self.config.location,
                backup = %backup.display(),
                "Backup file is empty or doesn't exist"
            );
            return false;
        }

        match read_file(&self.config.location, backup) {
            Ok(contents) if !contents.is_empty() && accept(&contents, true) => {
                self.store(contents);
                info!(location = %self.config.location, backup = %backup.display(), "Settings loaded from backup");
                true
            }
            _ => {
                error!(location = %self.config.location, backup = %backup.display(), "Failed to load backup file");
                false
            }
        }
    }

    fn check_remote(
        &self,
        force: bool,
        force_backup: bool,
        accept: &mut dyn FnMut(&str, bool) -> bool,
    ) -> bool {
        let winner = !force && self.claim_reload();
        if !force && !winner {
            return true;
        }

        let mut result = false;
        match self.read() {
            Ok(contents) if contents.is_empty() => {
                warn!(location = %self.config.location, "Remote content is empty");
            }
            Ok(contents) => {
                if accept(&contents, false) {
                    self.write_backup(&contents, force_backup);
                    self.store(contents);
                    result = true;
                }
            }
            Err(e) => error!(location = %self.config.location, error = %e, "Failed to fetch remote"),
        }

        if !result {
            if let Some(backup) = &self.config.backup {
                result = self.check_backup(backup, accept);
            }
        }

        let mut state = self.state.lock();
        if result {
            state.loaded_at = Some(Instant::now());
        }
        if winner {
            state.reloading = false;
        }
        result
    }
}

impl ContentProvider for Remote {
    fn location(&self) -> &str {
        &self.config.location
    }

    fn check(&self, force: bool, accept: &mut dyn FnMut(&str, bool) -> bool) -> bool {
        self.check_remote(force, false, accept)
    }

    fn check_with_backup(
        &self,
        force: bool,
        force_backup: bool,
        accept: &mut dyn FnMut(&str, bool) -> bool,
    ) -> bool {
        self.check_remote(force, force_backup, accept)
    }
}

fn read_file(location: &str, path: &Path) -> Result<String> {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| {
            ScriptError::remote(location, format!("Failed to read file {}: {}", path.display(), e))
        })
}

fn build_client(config: &RemoteConfig) -> Result<reqwest::blocking::Client> {
    let invalid = |e: String| ScriptError::remote(&config.location, e);

    let mut builder = reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(!config.verify_peer || !config.verify_host);
    if let Some(timeout) = config.connection_timeout {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(timeout) = config.transfer_timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(ca_file) = &config.ca_file {
        let pem = fs::read(ca_file).map_err(|e| invalid(e.to_string()))?;
        let certificate =
            reqwest::Certificate::from_pem(&pem).map_err(|e| invalid(e.to_string()))?;
        builder = builder.add_root_certificate(certificate);
    }
    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| invalid(e.to_string()))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| invalid(e.to_string()))
}
