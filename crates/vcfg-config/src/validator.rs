//! Configuration validation

use crate::Config;
use std::collections::HashSet;
use vcfg_core::{Error, Result};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_scripts(config)?;
    validate_rules(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_scripts(config: &Config) -> Result<()> {
    let mut names = HashSet::new();

    for script in &config.scripts {
        if script.name.is_empty() {
            return Err(Error::Config("script name cannot be empty".to_string()));
        }

        if !names.insert(script.name.as_str()) {
            return Err(Error::Config(format!(
                "Duplicate script name: {}",
                script.name
            )));
        }

        script
            .settings
            .validate()
            .map_err(|e| Error::Config(format!("script '{}': {}", script.name, e)))?;

        match (&script.remote, &script.code) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(format!(
                    "script '{}': remote and code are mutually exclusive",
                    script.name
                )));
            }
            (Some(remote), None) if remote.location.is_empty() => {
                return Err(Error::Config(format!(
                    "script '{}': remote location cannot be empty",
                    script.name
                )));
            }
            (None, None) => {
                tracing::warn!(
                    script = %script.name,
                    "Script has no content and only runs ad-hoc code"
                );
            }
            _ => {}
        }
    }

    Ok(())
}

fn validate_rules(config: &Config) -> Result<()> {
    let mut names = HashSet::new();

    for rules in &config.rules {
        if rules.name.is_empty() {
            return Err(Error::Config("rules name cannot be empty".to_string()));
        }
        if !names.insert(rules.name.as_str()) {
            return Err(Error::Config(format!("Duplicate rules name: {}", rules.name)));
        }
        if rules.remote.location.is_empty() {
            return Err(Error::Config(format!(
                "rules '{}': remote location cannot be empty",
                rules.name
            )));
        }
    }

    Ok(())
}

fn validate_logging(config: &Config) -> Result<()> {
    match config.logging.format.as_str() {
        "text" | "json" => Ok(()),
        other => Err(Error::Config(format!(
            "Invalid log format: {} (must be text or json)",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use vcfg_scripting::{RemoteConfig, ScriptConfig};

    fn minimal_config() -> Config {
        Config {
            scripts: vec![ScriptDefinition::new("router").with_code("return 1")],
            rules: vec![RulesDefinition::new(
                "backends",
                RemoteConfig::new("file:///tmp/backends.rules"),
            )],
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_minimal_config() {
        assert!(validate_config(&minimal_config()).is_ok());
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = minimal_config();
        config.scripts.push(ScriptDefinition::new("router"));

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate script name"));
    }

    #[test]
    fn test_empty_name() {
        let mut config = minimal_config();
        config.scripts.push(ScriptDefinition::new(""));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_settings() {
        let mut config = minimal_config();
        config.scripts[0].settings = ScriptConfig::default().with_min_gc_cycles(0);

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("script 'router'"));
    }

    #[test]
    fn test_remote_and_code_exclusive() {
        let mut config = minimal_config();
        config.scripts[0].remote = Some(RemoteConfig::new("file:///tmp/router.lua"));
        assert!(validate_config(&config).is_err());

        config.scripts[0].code = None;
        assert!(validate_config(&config).is_ok());

        config.scripts[0].remote = Some(RemoteConfig::new(""));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rules_definitions() {
        let mut config = minimal_config();
        config.rules.push(config.rules[0].clone());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate rules name"));

        let mut config = minimal_config();
        config.rules[0].remote.location.clear();
        assert!(validate_config(&config).is_err());

        let mut config = minimal_config();
        config.rules[0].name = "router".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = minimal_config();
        config.logging.format = "xml".to_string();
        assert!(validate_config(&config).is_err());
    }
}
