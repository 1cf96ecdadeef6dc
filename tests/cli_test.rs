//! CLI exit-code contract: 0 success, 1 runtime failure, 2 invalid
//! invocation.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn fastsearch() -> Command {
    Command::cargo_bin("fastsearch").expect("binary")
}

#[test]
fn help_exits_zero() {
    fastsearch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hybrid"));
}

#[test]
fn unknown_subcommand_exits_two() {
    fastsearch().arg("frobnicate").assert().code(2);
}

#[test]
fn missing_required_argument_exits_two() {
    fastsearch().arg("index").assert().code(2);
}

#[test]
fn runtime_failure_exits_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing_db = dir.path().join("missing.db");

    fastsearch()
        .args(["--db-path", &missing_db.to_string_lossy(), "delete", "x.md"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("store unavailable"));
}

#[test]
fn delete_on_empty_store_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("store.db");
    let db_str = db.to_string_lossy().to_string();

    fastsearch()
        .args(["--db-path", &db_str, "init", "--dimension", "8"])
        .assert()
        .success();

    fastsearch()
        .args(["--db-path", &db_str, "delete", "nothing.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No chunks matched"));
}
