//! CLI integration tests for dualwrite-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! exit codes for error conditions, and end-to-end repair against SQLite files.

use assert_cmd::Command;
use dualwrite_migrate::core::Conn;
use dualwrite_migrate::drivers::SqlitePool;
use dualwrite_migrate::{Config, SqlValue};
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Get a command for the dualwrite-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("dualwrite-migrate").unwrap()
}

fn sqlite_config(dir: &Path, pattern: &str) -> std::path::PathBuf {
    let yaml = format!(
        "base:\n  type: sqlite\n  path: {base}\n\
         target:\n  type: sqlite\n  path: {target}\n\
         migration:\n  pattern: {pattern}\n  tables:\n    - name: users\n",
        base = dir.join("base.db").display(),
        target = dir.join("target.db").display(),
        pattern = pattern,
    );
    let path = dir.join("config.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

async fn seed(store: &dualwrite_migrate::StoreConfig, rows: &[(i64, &str)]) -> SqlitePool {
    let cancel = CancellationToken::new();
    let pool = SqlitePool::connect(store, "seed").await.unwrap();
    pool.exec(
        &cancel,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        &[],
    )
    .await
    .unwrap();
    for (id, name) in rows {
        pool.exec(
            &cancel,
            "INSERT INTO users (id, name) VALUES (?, ?)",
            &[SqlValue::I64(*id), SqlValue::from(*name)],
        )
        .await
        .unwrap();
    }
    pool
}

async fn names(pool: &SqlitePool) -> Vec<(i64, String)> {
    pool.query(
        &CancellationToken::new(),
        "SELECT id, name FROM users ORDER BY id",
        &[],
    )
    .await
    .unwrap()
    .iter()
    .map(|row| (row.get_i64("id").unwrap(), row.get_string("name").unwrap()))
    .collect()
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
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("fix"))
        .stdout(predicate::str::contains("repair"));
}

#[test]
fn test_validate_subcommand_help() {
    cmd()
        .args(["validate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--table"))
        .stdout(predicate::str::contains("--since"))
        .stdout(predicate::str::contains("--continuous"));
}

#[test]
fn test_fix_subcommand_help() {
    cmd()
        .args(["fix", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--table"))
        .stdout(predicate::str::contains("--id"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dualwrite-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_unknown_log_format_exits_with_code_1() {
    cmd()
        .args(["--log-format", "xml", "health-check"])
        .assert()
        .code(1);
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 1)
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_pattern_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(dir.path(), "shadow_write");

    cmd()
        .args(["--config", config.to_str().unwrap(), "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("shadow_write"));
}

#[test]
fn test_same_store_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "base:\n  type: postgres\n  host: db\n  database: app\n  user: app\n\
         target:\n  type: postgres\n  host: db\n  database: app\n  user: app\n\
         migration:\n  tables:\n    - name: users"
    )
    .unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("same database"));
}

#[test]
fn test_unconfigured_table_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(dir.path(), "base_first");

    cmd()
        .args(["--config", config.to_str().unwrap(), "validate", "--table", "orders"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not configured"));
}

// =============================================================================
// End-to-end Tests
// =============================================================================

#[test]
fn test_health_check_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(dir.path(), "base_only");

    cmd()
        .args(["--config", config.to_str().unwrap(), "health-check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("HEALTHY"));
}

#[tokio::test]
async fn test_validate_reports_drift_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = sqlite_config(dir.path(), "base_first");
    let config = Config::load(&path).unwrap();
    seed(&config.base, &[(1, "ada"), (2, "bob")]).await;
    seed(&config.target, &[(2, "robert"), (3, "cyd")]).await;

    let output = cmd()
        .args([
            "--config",
            path.to_str().unwrap(),
            "--output-json",
            "validate",
            "--table",
            "users",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["forward"]["target_missing"], 1);
    assert_eq!(report["forward"]["not_equal"], 1);
    assert_eq!(report["reverse"]["base_missing"], 1);
}

#[tokio::test]
async fn test_fix_single_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = sqlite_config(dir.path(), "base_first");
    let config = Config::load(&path).unwrap();
    seed(&config.base, &[(1, "ada")]).await;
    let target = seed(&config.target, &[]).await;

    cmd()
        .args([
            "--config",
            path.to_str().unwrap(),
            "fix",
            "--table",
            "users",
            "--id",
            "1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("users id=1: upserted"));

    assert_eq!(names(&target).await, vec![(1, "ada".to_string())]);
}

#[tokio::test]
async fn test_repair_converges_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = sqlite_config(dir.path(), "base_first");
    let config = Config::load(&path).unwrap();
    let base = seed(&config.base, &[(1, "ada"), (2, "bob"), (4, "dee")]).await;
    let target = seed(&config.target, &[(2, "robert"), (3, "cyd"), (4, "dee")]).await;

    cmd()
        .args(["--config", path.to_str().unwrap(), "repair", "--table", "users"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Upserted: 2"))
        .stdout(predicate::str::contains("Deleted: 1"));

    assert_eq!(names(&target).await, names(&base).await);
}

#[tokio::test]
async fn test_repair_after_cutover_converges_base() {
    let dir = tempfile::tempdir().unwrap();
    let path = sqlite_config(dir.path(), "target_first");
    let config = Config::load(&path).unwrap();
    let base = seed(&config.base, &[(1, "stale")]).await;
    let target = seed(&config.target, &[(1, "fresh"), (2, "new")]).await;

    cmd()
        .args(["--config", path.to_str().unwrap(), "repair", "--table", "users"])
        .assert()
        .success();

    assert_eq!(
        names(&base).await,
        vec![(1, "fresh".to_string()), (2, "new".to_string())]
    );
    assert_eq!(names(&target).await.len(), 2);
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
