use assert_cmd::Command;
use predicates::prelude::*;

fn fdm() -> Command {
    Command::cargo_bin("fdm").unwrap()
}

#[test]
fn check_config_with_defaults() {
    fdm()
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("config ok"));
}

#[test]
fn print_runs_a_small_move_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("square.gcode");
    std::fs::write(
        &file,
        "G28\nG1 X10 F3600\nG1 X10 Y10\nG1 X0 Y10\nG1 X0 Y0\n",
    )
    .unwrap();

    fdm()
        .arg("print")
        .arg(&file)
        .arg("--summary")
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"))
        .stdout(predicate::str::contains("\"moves\":4"));
}

#[test]
fn bad_checksum_requests_resend() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.gcode");
    std::fs::write(&file, "N1 G1 X5 F3600*99\n").unwrap();

    fdm()
        .arg("print")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("error:"))
        .stdout(predicate::str::contains("Resend:1"));
}

#[test]
fn settings_reset_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.bin");

    fdm()
        .arg("settings")
        .arg("reset")
        .arg(&path)
        .assert()
        .success();
    assert!(path.exists());

    fdm()
        .arg("settings")
        .arg("show")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("axis_steps_per_mm"));
}

#[test]
fn invalid_config_fails_with_guidance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[pins]\nheater_hotend = 4\n").unwrap();

    fdm()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("How to fix"));
}
