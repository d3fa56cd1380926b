//! Basic CLI integration tests

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_help() {
    Command::cargo_bin("jozin")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("content-addressed filesystem indexer"));
}

#[test]
fn test_index_help() {
    Command::cargo_bin("jozin")
        .unwrap()
        .args(["index", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Index a directory tree"));
}

#[test]
fn test_version() {
    Command::cargo_bin("jozin")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("jozin"));
}

#[test]
fn test_index_writes_aggregate_file() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
    let output = dir.path().join("index.json");

    Command::cargo_bin("jozin")
        .unwrap()
        .args([
            "index",
            dir.path().to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    let contents = std::fs::read_to_string(&output).unwrap();
    let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(json["type"], "directory");
    assert!(json["items"].is_array());
}

#[test]
fn test_index_nonexistent_path_fails() {
    Command::cargo_bin("jozin")
        .unwrap()
        .args(["index", "/nonexistent/path/xyz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_index_meta_merge_delete_requires_output() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("jozin")
        .unwrap()
        .args([
            "index",
            dir.path().to_str().unwrap(),
            "--meta-merge-delete",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("meta_merge_delete requires"));
}

#[test]
fn test_rollback_restores_renamed_file() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("photo.jpg"), b"hello").unwrap();

    Command::cargo_bin("jozin")
        .unwrap()
        .args(["index", dir.path().to_str().unwrap(), "--rename"])
        .assert()
        .success();

    assert!(!dir.path().join("photo.jpg").exists());

    Command::cargo_bin("jozin")
        .unwrap()
        .args(["rollback", dir.path().to_str().unwrap(), "--flat"])
        .assert()
        .success()
        .stdout(predicate::str::contains("photo.jpg"));

    assert!(dir.path().join("photo.jpg").exists());
}
