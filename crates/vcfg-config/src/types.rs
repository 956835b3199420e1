//! Configuration types

use serde::{Deserialize, Serialize};
use vcfg_core::{Error, Result};
use vcfg_scripting::{InlineSource, Remote, RemoteConfig, Rules, Script, ScriptConfig};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Script objects
    #[serde(default)]
    pub scripts: Vec<ScriptDefinition>,

    /// Rules objects
    #[serde(default)]
    pub rules: Vec<RulesDefinition>,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Find a script definition by name
    pub fn script(&self, name: &str) -> Option<&ScriptDefinition> {
        self.scripts.iter().find(|s| s.name == name)
    }

    /// Find a rules definition by name
    pub fn rules(&self, name: &str) -> Option<&RulesDefinition> {
        self.rules.iter().find(|r| r.name == name)
    }
}

/// One script object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptDefinition {
    /// Script name
    pub name: String,

    /// Location the script body is loaded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,

    /// Inline script body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Engine pool and sandbox settings
    #[serde(default)]
    pub settings: ScriptConfig,
}

impl ScriptDefinition {
    /// Definition with default settings and no content
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            remote: None,
            code: None,
            settings: ScriptConfig::default(),
        }
    }

    /// Load the body from a remote location
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Use an inline body
    pub fn with_code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: ScriptConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Create the script object, running its initial load
    pub fn build(&self) -> Result<Script> {
        let settings = self.settings.clone();
        let script = match (&self.remote, &self.code) {
            (Some(remote), _) => {
                let remote = Remote::new(remote.clone()).map_err(script_error)?;
                Script::with_provider(self.name.as_str(), settings, remote)
            }
            (None, Some(code)) => {
                Script::with_provider(self.name.as_str(), settings, InlineSource::new(code.as_str()))
            }
            (None, None) => Script::new(self.name.as_str(), settings),
        };
        script.map_err(script_error)
    }
}

/// One rules object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulesDefinition {
    /// Rules name
    pub name: String,

    /// Location the rules text is loaded from
    pub remote: RemoteConfig,
}

impl RulesDefinition {
    /// Rules loaded from `remote`
    pub fn new<S: Into<String>>(name: S, remote: RemoteConfig) -> Self {
        Self {
            name: name.into(),
            remote,
        }
    }

    /// Create the rules object, running its initial load
    pub fn build(&self) -> Result<Rules> {
        let remote = Remote::new(self.remote.clone()).map_err(script_error)?;
        Ok(Rules::new(self.name.as_str(), remote))
    }
}

fn script_error(err: vcfg_scripting::ScriptError) -> Error {
    Error::Config(err.to_string())
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "text");
    }

    #[test]
    fn test_build_inline_script() {
        let script = ScriptDefinition::new("inline")
            .with_code("return 'ok'")
            .build()
            .unwrap();
        assert_eq!(script.name(), "inline");
        assert_eq!(script.inspect().as_deref(), Some("return 'ok'"));
    }

    #[test]
    fn test_build_rules() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("backends.rules");
        std::fs::write(&path, "^/api/ -> api\n").unwrap();

        let rules = RulesDefinition::new("backends", RemoteConfig::new(path.display().to_string()))
            .build()
            .unwrap();
        assert_eq!(rules.name(), "backends");
        assert_eq!(rules.get("/api/v1", Some("web")).as_deref(), Some("api"));
        assert_eq!(rules.get("/", Some("web")).as_deref(), Some("web"));
    }

    #[test]
    fn test_build_rejects_bad_settings() {
        let err = ScriptDefinition::new("bad")
            .with_settings(ScriptConfig::default().with_max_engines(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
