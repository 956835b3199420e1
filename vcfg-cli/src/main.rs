//! vcfg CLI

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vcfg_config::{load_config, Config};
use vcfg_core::{HttpSlot, RequestContext};
use vcfg_scripting::{Script, TaskState};

#[derive(Parser, Debug)]
#[command(name = "vcfg")]
#[command(about = "Pooled, sandboxed configuration scripts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "vcfg.yaml")]
        config: PathBuf,
    },

    /// Execute a configured script once and print its result
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "vcfg.yaml")]
        config: PathBuf,

        /// Script name
        #[arg(short, long)]
        script: String,

        /// Ad-hoc code to run instead of the loaded script body
        #[arg(long)]
        code: Option<String>,

        /// Argument pushed before execution (repeatable)
        #[arg(short, long = "arg")]
        args: Vec<String>,

        /// Request header as `name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Force a full garbage collection after the call
        #[arg(long)]
        gc: bool,

        /// Print the script statistics afterwards
        #[arg(long)]
        stats: bool,

        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long, env = "VCFG_LOG_LEVEL")]
        log_level: Option<String>,
    },

    /// Load a configured script and print its statistics
    Stats {
        /// Path to configuration file
        #[arg(short, long, default_value = "vcfg.yaml")]
        config: PathBuf,

        /// Script name
        #[arg(short, long)]
        script: String,
    },

    /// Match values against configured rules and print the outcome
    Rules {
        /// Path to configuration file
        #[arg(short, long, default_value = "vcfg.yaml")]
        config: PathBuf,

        /// Rules name
        #[arg(short, long)]
        rules: String,

        /// Value returned when no rule matches
        #[arg(short, long)]
        fallback: Option<String>,

        /// Print the loaded rules text instead of matching
        #[arg(long)]
        inspect: bool,

        /// Values to match
        values: Vec<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    for script in &cfg.scripts {
                        tracing::info!(
                            "  Script: {} ({}, max_engines={})",
                            script.name,
                            script.settings.engine,
                            script.settings.max_engines
                        );
                    }
                    for rules in &cfg.rules {
                        tracing::info!("  Rules: {} ({})", rules.name, rules.remote.location);
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Run {
            config,
            script,
            code,
            args,
            headers,
            gc,
            stats,
            log_level,
        } => {
            let cfg = load_config(&config)?;
            let level = log_level.unwrap_or_else(|| cfg.logging.level.clone());
            init_tracing(&level, cfg.logging.format == "json")?;

            let script = build_script(&cfg, &script)?;
            let ctx = request_context(&headers)?;

            let mut task = TaskState::new();
            script.init(&mut task, code.as_deref());
            for arg in &args {
                script.push(&mut task, Some(arg));
            }
            let success = script.execute(&mut task, Some(&ctx), gc, false);

            let output = serde_json::json!({
                "success": success,
                "result": task.result(),
                "resp": header_object(ctx.headers(HttpSlot::Resp).unwrap_or_default()),
                "log": ctx.log_lines(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);

            if stats {
                println!("{}", script.stats());
            }
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Stats { config, script } => {
            let cfg = load_config(&config)?;
            init_tracing(&cfg.logging.level, cfg.logging.format == "json")?;

            let script = build_script(&cfg, &script)?;
            println!("{}", script.stats());
            Ok(())
        }

        Commands::Rules {
            config,
            rules,
            fallback,
            inspect,
            values,
        } => {
            let cfg = load_config(&config)?;
            init_tracing(&cfg.logging.level, cfg.logging.format == "json")?;

            let rules = cfg
                .rules(&rules)
                .ok_or_else(|| anyhow!("Rules '{}' are not defined", rules))?
                .build()?;

            if inspect {
                print!("{}", rules.inspect().unwrap_or_default());
                return Ok(());
            }

            let matches = values
                .iter()
                .map(|value| (value.clone(), rules.get(value, fallback.as_deref()).into()))
                .collect::<serde_json::Map<_, serde_json::Value>>();
            println!("{}", serde_json::to_string_pretty(&matches)?);
            Ok(())
        }

        Commands::Version => {
            println!("vcfg");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

fn build_script(config: &Config, name: &str) -> Result<Script> {
    let definition = config
        .script(name)
        .ok_or_else(|| anyhow!("Script '{}' is not defined", name))?;
    Ok(definition.build()?)
}

/// Request context with `req` holding the given headers and an empty `resp`
fn request_context(headers: &[String]) -> Result<RequestContext> {
    let mut req = HeaderMap::new();
    for header in headers {
        let (name, value) = parse_header(header)?;
        req.append(name, value);
    }
    Ok(RequestContext::new()
        .with_slot(HttpSlot::Req, req)
        .with_slot(HttpSlot::Resp, HeaderMap::new()))
}

fn parse_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let (name, value) = header
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid header '{}': expected 'name: value'", header))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("Invalid header name in '{}'", header))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("Invalid header value in '{}'", header))?;
    Ok((name, value))
}

fn header_object(headers: HeaderMap) -> serde_json::Value {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                serde_json::Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(filter.into());

    if json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "vcfg", "run", "-s", "router", "-a", "eu", "--arg", "GET", "-H", "Host: example.com",
            "--gc",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                config,
                script,
                args,
                headers,
                gc,
                stats,
                code,
                ..
            } => {
                assert_eq!(config, PathBuf::from("vcfg.yaml"));
                assert_eq!(script, "router");
                assert_eq!(args, vec!["eu", "GET"]);
                assert_eq!(headers, vec!["Host: example.com"]);
                assert!(gc);
                assert!(!stats);
                assert_eq!(code, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rules_command() {
        let cli = Cli::try_parse_from([
            "vcfg", "rules", "-r", "backends", "--fallback", "web", "/api/v1", "/index.html",
        ])
        .unwrap();

        match cli.command {
            Commands::Rules {
                rules,
                fallback,
                inspect,
                values,
                ..
            } => {
                assert_eq!(rules, "backends");
                assert_eq!(fallback.as_deref(), Some("web"));
                assert!(!inspect);
                assert_eq!(values, vec!["/api/v1", "/index.html"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_run_requires_script() {
        assert!(Cli::try_parse_from(["vcfg", "run"]).is_err());
    }

    #[test]
    fn test_parse_header() {
        let (name, value) = parse_header("X-Country:  es ").unwrap();
        assert_eq!(name, "x-country");
        assert_eq!(value, "es");

        assert!(parse_header("no-colon").is_err());
        assert!(parse_header("bad name: x").is_err());
    }

    #[test]
    fn test_request_context_slots() {
        let ctx = request_context(&["Accept: text/html".to_string()]).unwrap();
        assert_eq!(
            ctx.header(HttpSlot::Req, "accept").unwrap().as_deref(),
            Some("text/html")
        );
        assert!(ctx.is_available(HttpSlot::Resp));
        assert!(!ctx.is_available(HttpSlot::Bereq));
    }
}
