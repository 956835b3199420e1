//! Integration tests for rules objects loaded from remote locations

use std::fs;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use vcfg_scripting::prelude::*;

fn file_rules(dir: &TempDir, contents: &str, period: Duration) -> (std::path::PathBuf, Rules) {
    let primary = dir.path().join("routes.rules");
    fs::write(&primary, contents).unwrap();
    let config = RemoteConfig::new(format!("file://{}", primary.display()))
        .with_period(period)
        .with_backup(dir.path().join("routes.rules.backup"));
    (primary, Rules::new("routes", Remote::new(config).unwrap()))
}

#[test]
fn test_reload_replaces_rules() {
    let dir = TempDir::new().unwrap();
    let (primary, rules) = file_rules(&dir, "^/api/ -> v1\n", Duration::ZERO);
    assert_eq!(rules.get("/api/users", None).as_deref(), Some("v1"));

    fs::write(&primary, "^/api/ -> v2\n^/static/ -> cdn\n").unwrap();
    assert_eq!(rules.get("/api/users", None).as_deref(), Some("v1"));

    assert!(rules.reload());
    assert_eq!(rules.len(), 2);
    assert_eq!(rules.get("/api/users", None).as_deref(), Some("v2"));
    assert_eq!(rules.get("/static/app.js", None).as_deref(), Some("cdn"));
    assert_eq!(
        rules.inspect().as_deref(),
        Some("^/api/ -> v2\n^/static/ -> cdn\n")
    );
}

#[test]
fn test_broken_reload_keeps_previous_rules() {
    let dir = TempDir::new().unwrap();
    let (primary, rules) = file_rules(&dir, "^/api/ -> api\n", Duration::ZERO);

    fs::remove_file(dir.path().join("routes.rules.backup")).unwrap();
    fs::write(&primary, "^/api/ -> api\n([ -> broken\n").unwrap();

    assert!(!rules.reload());
    assert_eq!(rules.get("/api/", Some("none")).as_deref(), Some("api"));
    assert_eq!(rules.get("/other", Some("none")).as_deref(), Some("none"));
}

#[test]
fn test_broken_primary_uses_backup() {
    let dir = TempDir::new().unwrap();
    let (primary, rules) = file_rules(&dir, "^/api/ -> api\n", Duration::ZERO);
    assert_eq!(
        fs::read_to_string(dir.path().join("routes.rules.backup")).unwrap(),
        "^/api/ -> api\n"
    );

    fs::write(&primary, "not a rule\n").unwrap();
    assert!(rules.reload());
    assert_eq!(rules.get("/api/", None).as_deref(), Some("api"));
}

#[test]
fn test_periodic_reload_on_get() {
    let dir = TempDir::new().unwrap();
    let (primary, rules) = file_rules(&dir, ".* -> v1\n", Duration::from_millis(50));

    fs::write(&primary, ".* -> v2\n").unwrap();
    assert_eq!(rules.get("x", None).as_deref(), Some("v1"));

    thread::sleep(Duration::from_millis(80));
    assert_eq!(rules.get("x", None).as_deref(), Some("v2"));
}
