//! Configuration builder

use crate::types::{Config, LoggingConfig, RulesDefinition, ScriptDefinition};
use vcfg_core::Result;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    scripts: Vec<ScriptDefinition>,
    rules: Vec<RulesDefinition>,
    logging: LoggingConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script definition
    pub fn script(mut self, script: ScriptDefinition) -> Self {
        self.scripts.push(script);
        self
    }

    /// Add a rules definition
    pub fn rules(mut self, rules: RulesDefinition) -> Self {
        self.rules.push(rules);
        self
    }

    /// Set the log level
    pub fn log_level<S: Into<String>>(mut self, level: S) -> Self {
        self.logging.level = level.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        let config = Config {
            scripts: self.scripts,
            rules: self.rules,
            logging: self.logging,
        };
        crate::validator::validate_config(&config)?;
        Ok(config)
    }
}
