//! End-to-end runs of the `tilecost` binary on a temporary training
//! directory: label a raw log, train on it, and score test data.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const RAW_LOG: &str = "\
@1 1 1 features:0 1 1 0 1 0 16
1
@1 1 1 features:0 1 1 0 2 0 16
1
@1 1 1 features:0 1 1 0 3 0 16
1
@1 1 1 features:0 1 1 0 7 0 16
100
@1 1 1 features:0 1 1 0 8 0 16
100
@1 1 1 features:0 1 1 0 9 0 16
100
";

fn tilecost_bin() -> &'static str {
    env!("CARGO_BIN_EXE_tilecost")
}

fn run(train_dir: &Path, args: &[&str]) -> Output {
    let output = Command::new(tilecost_bin())
        .args(args)
        .env("CM_TRAIN_DIR", train_dir)
        .env_remove("TEST_DATA")
        .output()
        .expect("failed to run tilecost");
    assert!(
        output.status.success(),
        "tilecost {args:?} failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

#[test]
fn label_train_predict() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("measure"), RAW_LOG).unwrap();

    run(dir.path(), &["label", "--classes", "2"]);
    let preprocessed =
        std::fs::read_to_string(dir.path().join("preprocessed")).unwrap();
    assert_eq!(preprocessed.lines().count(), 12);

    run(dir.path(), &["train", "--rounds", "100", "--subsample", "1"]);
    assert!(dir.path().join("model_list").exists());

    let test_data = dir.path().join("test_data");
    std::fs::write(
        &test_data,
        "1 1 features:0 1 1 0 2 0 16\n\n1 1 features:0 1 1 0 8 0 16\n",
    )
    .unwrap();
    let output = run(
        dir.path(),
        &["predict", "--test-data", test_data.to_str().unwrap()],
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    let values: Vec<f64> =
        stdout.lines().map(|l| l.parse().unwrap()).collect();
    assert_eq!(values.len(), 2);
    assert!(values[0] < values[1], "predictions: {values:?}");

    // Same predictions through --output.
    let out_file = dir.path().join("predictions");
    run(
        dir.path(),
        &[
            "predict",
            "--test-data",
            test_data.to_str().unwrap(),
            "--output",
            out_file.to_str().unwrap(),
        ],
    );
    assert_eq!(std::fs::read_to_string(&out_file).unwrap(), stdout);
}

#[test]
fn predict_unknown_key_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("measure"), RAW_LOG).unwrap();
    run(dir.path(), &["label", "--classes", "2"]);
    run(dir.path(), &["train", "--rounds", "10"]);

    let test_data = dir.path().join("test_data");
    std::fs::write(&test_data, "1 1 features:1 1 1 0 2 0 16\n").unwrap();
    let output = Command::new(tilecost_bin())
        .args(["predict", "--test-data"])
        .arg(&test_data)
        .env("CM_TRAIN_DIR", dir.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn missing_train_dir_is_rejected() {
    let output = Command::new(tilecost_bin())
        .arg("label")
        .env_remove("CM_TRAIN_DIR")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--train-dir"), "stderr: {stderr}");
}

#[test]
fn bad_raw_log_keeps_previous_preprocessed_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("measure"), RAW_LOG).unwrap();
    run(dir.path(), &["label", "--classes", "2"]);
    let before =
        std::fs::read_to_string(dir.path().join("preprocessed")).unwrap();

    std::fs::write(dir.path().join("measure"), "1 1 0 1 1 0 1 0 16\n1\n")
        .unwrap();
    let output = Command::new(tilecost_bin())
        .args(["label", "--classes", "2"])
        .env("CM_TRAIN_DIR", dir.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("preprocessed")).unwrap(),
        before
    );
}
