//! Integration tests for the scratch CLI
//!
//! These tests run the actual binary against scratch files in a temp dir.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Binary with config isolated from the user's environment
fn scratch_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("scratch").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("config.toml"))
        .env_remove("SCRATCH_PROGRAM")
        .env_remove("SCRATCH_FRAGMENT_TIMEOUT")
        .env("NO_COLOR", "1");
    cmd
}

fn write_scratch(dir: &TempDir, text: &str) -> std::path::PathBuf {
    let path = dir.path().join("notes.sh");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_help_flag() {
    let dir = TempDir::new().unwrap();
    scratch_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run-on-edit"));
}

#[test]
fn test_fragments_lists_ranges() {
    let dir = TempDir::new().unwrap();
    let file = write_scratch(&dir, "echo one\n\necho two\necho three\n");

    scratch_cmd(&dir)
        .arg("fragments")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("[1-1] echo one"))
        .stdout(predicate::str::contains("[3-4] echo two"))
        .stdout(predicate::str::contains("2 fragments"));
}

#[test]
fn test_missing_file_shows_fix() {
    let dir = TempDir::new().unwrap();
    scratch_cmd(&dir)
        .arg("run")
        .arg(dir.path().join("nope.sh"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("SCRATCH-002"))
        .stderr(predicate::str::contains("Fix:"));
}

#[test]
fn test_fragments_missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    scratch_cmd(&dir)
        .arg("fragments")
        .arg(dir.path().join("nope.sh"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("SCRATCH-002"));
}

#[cfg(unix)]
#[test]
fn test_fragments_unreadable_path_is_io_error() {
    let dir = TempDir::new().unwrap();
    // A directory exists but cannot be read as text
    scratch_cmd(&dir)
        .arg("fragments")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("SCRATCH-039"))
        .stderr(predicate::str::contains("SCRATCH-002").not());
}

#[test]
fn test_malformed_config_is_reported() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.toml"), "[process\nprogram = ").unwrap();
    let file = write_scratch(&dir, "echo hi\n");

    scratch_cmd(&dir)
        .arg("run")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("SCRATCH-030"));
}

#[cfg(unix)]
#[test]
fn test_run_prints_fragment_output() {
    let dir = TempDir::new().unwrap();
    let file = write_scratch(&dir, "X=20\necho start\n\necho $((X + 22))\n");

    scratch_cmd(&dir)
        .arg("run")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Running scratch"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("42"))
        .stdout(predicate::str::contains("Done"));
}

#[cfg(unix)]
#[test]
fn test_failing_fragment_stops_run_and_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let file = write_scratch(&dir, "echo first\n\nfalse\n\necho never\n");

    scratch_cmd(&dir)
        .arg("run")
        .arg(&file)
        .assert()
        .failure()
        .stdout(predicate::str::contains("first"))
        .stdout(predicate::str::contains("exit status 1"))
        .stdout(predicate::str::contains("never").not());
}

#[cfg(unix)]
#[test]
fn test_trace_export_json() {
    let dir = TempDir::new().unwrap();
    let file = write_scratch(&dir, "echo traced\n");
    let trace = dir.path().join("trace.json");

    scratch_cmd(&dir)
        .arg("run")
        .arg(&file)
        .arg("--trace")
        .arg(&trace)
        .assert()
        .success();

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&trace).unwrap()).unwrap();
    let kinds: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"]["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["started", "record", "finished", "finished"]);
    assert_eq!(json[1]["kind"]["record"]["text"], "traced");
}

#[cfg(unix)]
#[test]
fn test_program_flag_overrides_interpreter() {
    let dir = TempDir::new().unwrap();
    let file = write_scratch(&dir, "echo hi\n");

    scratch_cmd(&dir)
        .arg("run")
        .arg(&file)
        .arg("--program")
        .arg("definitely-not-a-real-interpreter-xyz")
        .assert()
        .failure()
        .stdout(predicate::str::contains("SCRATCH-010"));
}
