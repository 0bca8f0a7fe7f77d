//! Integration tests for the CLI application
//!
//! These run the compiled binary against problem files written to temp dirs.

use std::io::Write;
use std::process::Command;
use tempfile::{NamedTempFile, TempDir};

/// Separable problem with explicit points
fn linear_problem_file() -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::with_suffix(".json")?;
    write!(
        file,
        r#"{{
            "labels": [1, -1, 1, -1, 1, -1],
            "kernel": {{
                "type": "linear",
                "points": [[2.0, 1.0], [-2.0, -1.0], [1.5, 0.8], [-1.5, -0.8], [1.8, 0.9], [-1.8, -0.9]]
            }}
        }}"#
    )?;
    file.flush()?;
    Ok(file)
}

/// Same labels over a precomputed matrix
fn precomputed_problem_file() -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::with_suffix(".json")?;
    write!(
        file,
        r#"{{
            "labels": [1, 1, -1, -1],
            "kernel": {{
                "type": "precomputed",
                "matrix": [
                    [1.0, 0.8, 0.1, 0.0],
                    [0.8, 1.0, 0.0, 0.1],
                    [0.1, 0.0, 1.0, 0.7],
                    [0.0, 0.1, 0.7, 1.0]
                ]
            }},
            "weights": [1.0, 1.0, 2.0, 1.0]
        }}"#
    )?;
    file.flush()?;
    Ok(file)
}

fn get_cli_binary_path() -> &'static str {
    env!("CARGO_BIN_EXE_chunksvm")
}

fn read_report(path: &std::path::Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path).expect("Failed to read report");
    serde_json::from_str(&text).expect("Report is not valid JSON")
}

#[test]
fn test_cli_train_command_linear() {
    let problem = linear_problem_file().expect("Failed to create problem file");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let report_path = temp_dir.path().join("report.json");

    let output = Command::new(get_cli_binary_path())
        .args([
            "train",
            "--problem",
            problem.path().to_str().unwrap(),
            "--output",
            report_path.to_str().unwrap(),
            "-C",
            "10.0",
            "--epsilon",
            "0.001",
            "--max-iterations",
            "100",
        ])
        .output()
        .expect("Failed to run CLI train command");

    assert!(
        output.status.success(),
        "Train command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = read_report(&report_path);
    assert_eq!(report["diagnostics"]["termination"], "Converged");
    assert_eq!(report["diagnostics"]["misclassified"], 0);
    assert_eq!(report["metadata"]["kernel"], "linear");
    assert_eq!(report["metadata"]["n_examples"], 6);
    assert_eq!(report["metadata"]["config"]["c"], 10.0);
}

#[test]
fn test_cli_train_precomputed_to_stdout() {
    let problem = precomputed_problem_file().expect("Failed to create problem file");

    let output = Command::new(get_cli_binary_path())
        .args([
            "train",
            "--problem",
            problem.path().to_str().unwrap(),
            "--qp-size",
            "2",
            "--no-shrinking",
            "--threads",
            "1",
        ])
        .output()
        .expect("Failed to run CLI train command");

    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not a JSON report");
    assert_eq!(report["metadata"]["kernel"], "precomputed");
    assert_eq!(report["metadata"]["config"]["qp_size"], 2);
    assert!(!report["metadata"]["config"]["shrinking"].as_bool().unwrap());
    assert!(report["model"]["support_vectors"].as_array().unwrap().len() >= 2);
}

#[test]
fn test_cli_config_command() {
    let output = Command::new(get_cli_binary_path())
        .arg("config")
        .output()
        .expect("Failed to run CLI config command");

    assert!(output.status.success());
    let config: chunksvm::SolverConfig =
        serde_json::from_slice(&output.stdout).expect("config output is not a SolverConfig");
    assert_eq!(config, chunksvm::SolverConfig::default());
}

#[test]
fn test_cli_config_file_is_applied() {
    let problem = linear_problem_file().expect("Failed to create problem file");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.json");
    let report_path = temp_dir.path().join("report.json");
    std::fs::write(&config_path, r#"{"c": 0.25, "qp_size": 4}"#).unwrap();

    let status = Command::new(get_cli_binary_path())
        .args([
            "train",
            "--problem",
            problem.path().to_str().unwrap(),
            "--config",
            config_path.to_str().unwrap(),
            "--epsilon",
            "0.01",
            "--output",
            report_path.to_str().unwrap(),
        ])
        .status()
        .expect("Failed to run CLI train command");

    assert!(status.success());
    let report = read_report(&report_path);
    assert_eq!(report["metadata"]["config"]["c"], 0.25);
    assert_eq!(report["metadata"]["config"]["qp_size"], 4);
    assert_eq!(report["metadata"]["config"]["epsilon"], 0.01);
}

#[test]
fn test_cli_info_command() {
    let problem = linear_problem_file().expect("Failed to create problem file");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let report_path = temp_dir.path().join("report.json");

    let train = Command::new(get_cli_binary_path())
        .args([
            "train",
            "-p",
            problem.path().to_str().unwrap(),
            "-o",
            report_path.to_str().unwrap(),
        ])
        .status()
        .expect("Failed to run CLI train command");
    assert!(train.success());

    let output = Command::new(get_cli_binary_path())
        .args(["info", report_path.to_str().unwrap()])
        .output()
        .expect("Failed to run CLI info command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Training Report"));
    assert!(stdout.contains("Termination:     Converged"));
    assert!(stdout.contains("Kernel: linear"));
}

#[test]
fn test_cli_missing_problem_file() {
    let output = Command::new(get_cli_binary_path())
        .args(["train", "--problem", "/nonexistent/problem.json"])
        .output()
        .expect("Failed to run CLI train command");

    assert!(!output.status.success());
}

#[test]
fn test_cli_rejects_invalid_parameters() {
    let problem = linear_problem_file().expect("Failed to create problem file");

    let output = Command::new(get_cli_binary_path())
        .args([
            "train",
            "--problem",
            problem.path().to_str().unwrap(),
            "--qp-size",
            "1",
        ])
        .output()
        .expect("Failed to run CLI train command");
    assert!(!output.status.success());

    let output = Command::new(get_cli_binary_path())
        .args(["train", "--problem", problem.path().to_str().unwrap(), "-C", "-1"])
        .output()
        .expect("Failed to run CLI train command");
    assert!(!output.status.success());
}

#[test]
fn test_cli_rejects_bad_labels() {
    let mut file = NamedTempFile::with_suffix(".json").unwrap();
    write!(
        file,
        r#"{{"labels": [1, 2], "kernel": {{"type": "linear", "points": [[1.0], [-1.0]]}}}}"#
    )
    .unwrap();
    file.flush().unwrap();

    let output = Command::new(get_cli_binary_path())
        .args(["train", "--problem", file.path().to_str().unwrap()])
        .output()
        .expect("Failed to run CLI train command");
    assert!(!output.status.success());
}
