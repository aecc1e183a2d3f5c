use std::path::PathBuf;
use std::process::{Command, Output};

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_auto_z_cli"))
}

fn temp_file(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "auto_z_cli_{}_{}.json",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("stdout UTF-8");
    serde_json::from_str(stdout.trim()).expect("command report JSON payload")
}

#[test]
fn calibrate_reports_correction() {
    let output = cli()
        .arg("calibrate")
        .output()
        .expect("failed to run auto_z_cli calibrate");
    assert!(
        output.status.success(),
        "CLI exited with {:?}",
        output.status.code()
    );

    let json = stdout_json(&output);
    assert_eq!(json["command"], "AUTO_Z_CALIBRATE");
    assert_eq!(json["ok"], true);
    assert_eq!(json["response"]["command"], "calibrate");
    let correction = json["response"]["correction"]
        .as_f64()
        .expect("numeric correction");
    assert!((correction - (-0.5)).abs() < 1e-9);
    assert_eq!(json["status"]["phase"], "idle");
    assert_eq!(
        json["response"]["measurements"]
            .as_array()
            .map(Vec::len)
            .unwrap_or_default(),
        3
    );
}

#[test]
fn probe_with_release_reports_both_heights() {
    let output = cli()
        .args(["probe", "--release"])
        .output()
        .expect("failed to run auto_z_cli probe");
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["command"], "AUTO_Z_PROBE RELEASE=1");
    let z = json["response"]["z"].as_f64().expect("trigger height");
    let release = json["response"]["release_z"]
        .as_f64()
        .expect("release height");
    assert!((z - 1.8).abs() < 1e-9);
    assert!(release > z);
}

#[test]
fn events_includes_history() {
    let output = cli()
        .args(["events", "AUTO_Z_PROBE"])
        .output()
        .expect("failed to run auto_z_cli events");
    assert!(output.status.success());

    let json = stdout_json(&output);
    let recent = json["events"]["recent"]
        .as_array()
        .expect("event history array");
    assert!(recent
        .iter()
        .any(|event| event["type"] == "sample_taken"));
    assert!(recent
        .iter()
        .any(|event| event["type"] == "current_restored"));
}

#[test]
fn unknown_event_line_is_a_setup_error() {
    let output = cli()
        .args(["events", "G28 Z"])
        .output()
        .expect("failed to run auto_z_cli events");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn list_commands_prints_every_command() {
    let output = cli()
        .arg("list-commands")
        .output()
        .expect("failed to run auto_z_cli list-commands");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    for name in [
        "AUTO_Z_PROBE",
        "AUTO_Z_HOME_Z",
        "AUTO_Z_MEASURE_OFFSET",
        "AUTO_Z_CALIBRATE",
        "AUTO_Z_LOAD_OFFSET",
        "AUTO_Z_SAVE_GCODE_OFFSET",
    ] {
        assert!(stdout.contains(name), "missing {name} in {stdout}");
    }
}

#[test]
fn state_file_carries_correction_between_runs() {
    let state = temp_file("state");
    let state_arg = state.to_string_lossy().into_owned();

    let output = cli()
        .args(["--state", &state_arg, "calibrate"])
        .output()
        .expect("failed to run calibrate with state");
    assert!(output.status.success());
    assert!(state.exists(), "state file written after success");

    let output = cli()
        .args(["--state", &state_arg, "load-offset"])
        .output()
        .expect("failed to run load-offset with state");
    assert!(output.status.success());
    let json = stdout_json(&output);
    let live = json["response"]["live_offset"]
        .as_f64()
        .expect("numeric live offset");
    assert!((live - (-0.5)).abs() < 1e-9);
    assert_eq!(json["status"]["probe_z_correction"], -0.5);

    let _ = std::fs::remove_file(&state);
}

#[test]
fn bed_sensor_out_of_reach_exits_with_probe_failure() {
    let config = temp_file("unreachable_bed");
    std::fs::write(
        &config,
        r#"{ "probe": { "pin": "bed_sensor" }, "printer": { "bed_trigger_z": -5.0 } }"#,
    )
    .expect("write config");

    let output = cli()
        .args(["--config", &config.to_string_lossy(), "home-z"])
        .output()
        .expect("failed to run home-z");
    assert_eq!(output.status.code(), Some(2));

    let json = stdout_json(&output);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], 2007);
    assert_eq!(json["status"]["phase"], "aborted");

    let _ = std::fs::remove_file(&config);
}

#[test]
fn invalid_config_exits_with_setup_error() {
    let config = temp_file("invalid_config");
    std::fs::write(&config, r#"{ "probe": { "pin": "bed_sensor", "speed": -1.0 } }"#)
        .expect("write config");

    let output = cli()
        .args(["--config", &config.to_string_lossy(), "status"])
        .output()
        .expect("failed to run status");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(stderr.contains("invalid probe configuration"), "{stderr}");

    let _ = std::fs::remove_file(&config);
}
