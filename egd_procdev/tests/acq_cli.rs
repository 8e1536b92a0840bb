//! `egd_acq` against the simulation driver.

use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn egd_acq() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_egd_acq"));
    cmd.arg("--executable").arg(env!("CARGO_BIN_EXE_egd_procdev"));
    cmd
}

#[test]
fn acquires_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("acq.toml");
    fs::write(
        &path,
        r#"
[shared]
service_name = "egd-acq-test"

[driver]
name = "simulation"
path = "fs|512|trigger|7"
numch = 16

[acquisition]
duration_s = 0.3
chunk_frames = 16
"#,
    )
    .unwrap();

    let output = egd_acq().arg("--config").arg(&path).output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("sampling rate: 512 Hz"), "{stdout}");
    assert!(stdout.contains("eeg:"), "{stdout}");
    assert!(stdout.contains("acquired"), "{stdout}");
}

#[test]
fn cli_overrides_without_config() {
    let output = egd_acq()
        .args(["--numch", "4", "--path", "fs|256", "--duration", "0.2"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("device id:     sim-4ch"));
}

#[test]
fn failing_device_exits_nonzero() {
    let output = egd_acq()
        .args(["--path", "fail|1", "--duration", "0.2"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn invalid_config_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("acq.toml");
    fs::write(&path, "[shared]\nservice_name = \"\"\n").unwrap();

    let output = egd_acq().arg("--config").arg(&path).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("service_name"));
}
