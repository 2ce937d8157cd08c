//! Integration tests for the `fractal settings` and `fractal checkpoints` commands.

use assert_cmd::Command;
use fractal_training::{CheckpointStore, SoftmaxEngine, Task, TaskId, TaskLayout};
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write a config whose data directory lives inside `temp_dir`.
fn write_config(temp_dir: &TempDir) -> PathBuf {
    let data_dir = temp_dir.path().join("data");
    let path = temp_dir.path().join("fractal.toml");
    std::fs::write(&path, format!("[client]\ndata_dir = {:?}\n", data_dir.display().to_string())).unwrap();
    path
}

fn fractal(temp_dir: &TempDir, config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fractal").unwrap();
    cmd.current_dir(temp_dir.path()).env_remove("RUST_LOG").arg("--config").arg(config);
    cmd
}

#[test]
fn test_settings_show_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);

    fractal(&temp_dir, &config)
        .args(["settings", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Admission policy"))
        .stdout(predicate::str::contains("Minimum charge: 34%"));
}

#[test]
fn test_switching_transport_persists() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);

    fractal(&temp_dir, &config).args(["settings", "data"]).assert().success();
    fractal(&temp_dir, &config).args(["settings", "wifi"]).assert().success();

    let output = fractal(&temp_dir, &config).args(["settings", "show", "--json"]).assert().success();
    let json: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    assert_eq!(json["on_wifi"], false);
    assert_eq!(json["on_data"], true);
    assert!(temp_dir.path().join("data").join("settings.toml").exists());
}

#[test]
fn test_disabling_last_transport_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);

    fractal(&temp_dir, &config)
        .args(["settings", "wifi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("network transport"));

    let output = fractal(&temp_dir, &config).args(["settings", "show", "--json"]).assert().success();
    let json: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    assert_eq!(json["on_wifi"], true);
}

#[test]
fn test_flags_and_min_charge() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);

    fractal(&temp_dir, &config).args(["settings", "overnight", "on"]).assert().success();
    fractal(&temp_dir, &config).args(["settings", "charging", "on"]).assert().success();
    fractal(&temp_dir, &config).args(["settings", "min-charge", "80"]).assert().success();
    fractal(&temp_dir, &config)
        .args(["settings", "min-charge", "150"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("between 0 and 100"));

    let output = fractal(&temp_dir, &config).args(["settings", "show", "--json"]).assert().success();
    let json: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    assert_eq!(json["overnight_only"], true);
    assert_eq!(json["charging_exclusive"], true);
    assert_eq!(json["min_charge_percent"], 80);
}

#[test]
fn test_checkpoints_empty() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);

    fractal(&temp_dir, &config)
        .arg("checkpoints")
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoints found."));
}

#[test]
fn test_checkpoints_json_lists_records() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);
    let store = CheckpointStore::new(TaskLayout::for_data_dir(&temp_dir.path().join("data")));
    let mut task = Task::new(TaskId(4));
    task.input_shape = vec![2, 2];
    task.num_classes = 2;
    store.commit(&task, &SoftmaxEngine::new(4, 2, 0.01), 3).unwrap();

    let output = fractal(&temp_dir, &config).args(["checkpoints", "--json"]).assert().success();
    let json: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    assert_eq!(json[0]["task_id"], 4);
    assert_eq!(json[0]["last_epoch"], 3);
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = TempDir::new().unwrap();

    fractal(&temp_dir, &temp_dir.path().join("absent.toml"))
        .args(["settings", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
