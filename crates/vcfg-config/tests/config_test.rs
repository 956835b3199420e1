//! Integration tests for loading configuration files and building scripts

use std::fs;

use tempfile::TempDir;
use vcfg_config::{load, ConfigFormat};
use vcfg_scripting::TaskState;

#[test]
fn test_load_file_and_build_scripts() {
    let dir = TempDir::new().unwrap();
    let script_path = dir.path().join("router.lua");
    fs::write(&script_path, "return 'backend-' .. ARGV[0]").unwrap();

    let config_path = dir.path().join("vcfg.yaml");
    fs::write(
        &config_path,
        format!(
            r#"
scripts:
  - name: "router"
    remote:
      location: "file://{}"
      period: "0s"
      backup: "{}"
  - name: "tagger"
    code: "ARGV.len()"
    settings:
      engine: "rhai"
      max_engines: 2
"#,
            script_path.display(),
            dir.path().join("router.lua.backup").display()
        ),
    )
    .unwrap();

    let config = load(&config_path).unwrap();
    assert_eq!(config.scripts.len(), 2);

    let router = config.script("router").unwrap().build().unwrap();
    let mut task = TaskState::new();
    router.init(&mut task, None);
    router.push(&mut task, Some("eu"));
    assert!(router.execute(&mut task, None, false, false));
    assert_eq!(task.get_string_result(), Some("backend-eu"));
    assert!(dir.path().join("router.lua.backup").exists());

    let tagger = config.script("tagger").unwrap().build().unwrap();
    let mut task = TaskState::new();
    tagger.init(&mut task, None);
    tagger.push(&mut task, Some("a"));
    tagger.push(&mut task, Some("b"));
    assert!(tagger.execute(&mut task, None, false, false));
    assert_eq!(task.get_integer_result(), 2);
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("vcfg.json");
    fs::write(
        &config_path,
        r#"{"scripts": [{"name": "a", "settings": {"max_engines": 0}}]}"#,
    )
    .unwrap();

    let err = load(&config_path).unwrap_err();
    assert!(err.to_string().contains("max_engines"));
}

#[test]
fn test_format_detection() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("vcfg.ini");
    fs::write(&config_path, "").unwrap();

    assert!(ConfigFormat::from_path(&config_path).is_err());
    assert!(load(&config_path).is_err());
}
