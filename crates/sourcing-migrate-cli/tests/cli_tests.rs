//! CLI integration tests for sourcing-migrate.
//!
//! These tests verify command-line argument parsing, help output, and exit
//! codes for error conditions that do not need a live database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::PathBuf;

/// Get a command for the sourcing-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("sourcing-migrate").unwrap()
}

/// Write a syntactically valid config to a temp path and return it.
fn temp_config(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("sourcing-migrate-test-{}-{}.yaml", tag, std::process::id()));
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        r#"source:
  host: localhost
  database: legacy
  user: u
  password: p
target:
  host: localhost
  database: redesigned
  user: u
  password: p
"#
    )
    .unwrap();
    path
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--all"))
        .stdout(predicate::str::contains("--autocommit"))
        .stdout(predicate::str::contains("--report-dir"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sourcing-migrate"));
}

// =============================================================================
// List
// =============================================================================

#[test]
fn test_list_shows_registered_migrations() {
    cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("event_master"))
        .stdout(predicate::str::contains("event_price_bid_columns"));
}

#[test]
fn test_list_needs_no_config_file() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "list"])
        .assert()
        .success();
}

// =============================================================================
// Error handling and exit codes
// =============================================================================

#[test]
fn test_run_without_name_or_all_fails() {
    let config = temp_config("noname");
    cmd()
        .args(["--config", config.to_str().unwrap(), "run"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn test_run_name_conflicts_with_all() {
    let config = temp_config("conflict");
    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "run",
            "event_master",
            "--all",
        ])
        .assert()
        .failure();
}

#[test]
fn test_run_unknown_migration_exits_with_config_code() {
    let config = temp_config("unknown");
    cmd()
        .args(["--config", config.to_str().unwrap(), "run", "no_such_table"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Unknown migration"));
}

#[test]
fn test_missing_config_file_fails() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "health-check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_invalid_config_rejected_before_connecting() {
    let path = std::env::temp_dir().join(format!(
        "sourcing-migrate-test-invalid-{}.yaml",
        std::process::id()
    ));
    std::fs::write(&path, "source:\n  host: ''\n").unwrap();
    cmd()
        .args(["--config", path.to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(2);
}
