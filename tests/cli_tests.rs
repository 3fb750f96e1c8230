use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use h1bfilter::config::DEFAULT_CONFIG;

/// Config file in `dir` whose cache lives in the same temp dir
fn write_config(dir: &Path) -> PathBuf {
    let storage = dir.join("storage.json");
    let content = DEFAULT_CONFIG.replace(
        "\"cache/h1bfilter-storage.json\"",
        &format!("'{}'", storage.display()),
    );
    let path = dir.join("h1bfilter.toml");
    std::fs::write(&path, content).unwrap();
    path
}

fn h1bfilter() -> Command {
    let mut cmd = Command::cargo_bin("h1bfilter").unwrap();
    cmd.write_stdin("");
    cmd
}

#[test]
fn test_help_lists_commands() {
    h1bfilter()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("H-1B"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn test_init_writes_default_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("h1bfilter.toml");

    h1bfilter()
        .arg("--init")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created default configuration file"));

    assert_eq!(std::fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);
}

#[test]
fn test_missing_config_fails_when_not_interactive() {
    let dir = TempDir::new().unwrap();

    h1bfilter()
        .args(["cache", "list", "--config"])
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_cache_list_on_empty_cache() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    h1bfilter()
        .args(["cache", "list", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("No cached companies found"));

    // loading an empty cache persists a fresh record
    assert!(dir.path().join("storage.json").exists());
}

#[test]
fn test_cache_clear_requires_target() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    h1bfilter()
        .args(["cache", "clear", "--config"])
        .arg(&config)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn test_cache_show_unknown_company_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    h1bfilter()
        .args(["cache", "show", "Meta Platforms Inc", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("key 'meta'"));
}

#[test]
fn test_check_with_filter_disabled_outputs_json() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let output = h1bfilter()
        .args(["check", "Meta", "Acme Robotics", "--disable-filter", "--format", "json", "--config"])
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["stats"]["total_jobs"], 2);
    assert_eq!(report["results"][0]["company"], "Meta");
    assert_eq!(report["results"][1]["disposition"], "show");
}

#[test]
fn test_check_requires_names_or_input() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    h1bfilter()
        .args(["check", "--config"])
        .arg(&config)
        .assert()
        .code(2);
}
