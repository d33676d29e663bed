//! Tests that invoke the `qsl` binary.

use std::process::Command;

fn qsl() -> Command {
    // CARGO_BIN_EXE_qsl is set by cargo when running tests for this crate
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_qsl"));
    cmd.current_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/../.."));
    cmd
}

#[test]
fn test_run_writes_json_report() {
    let output = qsl()
        .args(["run", "scenarios/basic.yaml", "--report", "-", "--seed", "5"])
        .output()
        .expect("Failed to execute qsl binary");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "qsl failed: {}", stderr);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json_start = stdout.find('{').expect("No JSON found in output");
    let report: serde_json::Value =
        serde_json::from_str(&stdout[json_start..]).expect("Failed to parse report JSON");

    assert_eq!(report["scenario"], "basic");
    assert_eq!(report["seed"], 5);
    assert_eq!(report["connect"]["connected"], true);
    assert_eq!(report["sends"]["succeeded"], 3);
    assert!(report["metrics"]["counters"].is_object());
}

#[test]
fn test_check_rejects_missing_file() {
    let output = qsl()
        .args(["check", "scenarios/does-not-exist.yaml"])
        .output()
        .expect("Failed to execute qsl binary");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_check_accepts_bundled_scenarios() {
    for scenario in ["scenarios/basic.yaml", "scenarios/faulty.yaml"] {
        let status = qsl()
            .args(["check", scenario])
            .status()
            .expect("Failed to execute qsl binary");
        assert!(status.success(), "{} failed validation", scenario);
    }
}
