//! Integration tests for the `strata config` command.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_config_defaults_without_file() {
    let temp_dir = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("strata-cli").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[model_cache]"))
        .stdout(predicate::str::contains("max_cache_bytes = 6442450944"))
        .stdout(predicate::str::contains("lazy_offloading = true"));
}

#[test]
fn test_config_reads_strata_toml_in_current_dir() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("strata.toml"), "[model_cache]\ncapacity_policy = \"hard\"\n").unwrap();

    let mut cmd = Command::cargo_bin("strata-cli").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("capacity_policy = \"hard\""));
}

#[test]
fn test_config_json_output() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cache.toml");
    std::fs::write(&path, "[model_cache]\nexecution_device = \"cuda:1\"\nmax_vram_cache_bytes = 0\n").unwrap();

    let mut cmd = Command::cargo_bin("strata-cli").unwrap();
    let assert = cmd.arg("config").arg("--config").arg(&path).arg("--json").assert().success();

    let json: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(json["execution_device"], "cuda:1");
    assert_eq!(json["max_vram_cache_bytes"], 0);
    assert_eq!(json["precision"], "float16");
}

#[test]
fn test_config_rejects_invalid_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cache.toml");
    std::fs::write(&path, "[model_cache]\nstorage_device = \"cuda\"\n").unwrap();

    let mut cmd = Command::cargo_bin("strata-cli").unwrap();
    cmd.arg("config")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("host memory"));
}
