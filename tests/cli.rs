use std::process::Command;

use serde_json::Value;
use synth_modeler::fixtures::{generate_sine, write_wav};
use tempfile::tempdir;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_synth_modeler_cli"))
}

#[test]
fn dump_config_prints_defaults() {
    let output = cli()
        .arg("dump-config")
        .output()
        .expect("failed to run dump-config");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("config JSON");
    assert_eq!(json["common"]["sample_rate"], 16_000);
    assert_eq!(json["export"]["target"], "vital");
}

#[test]
fn infer_writes_preset() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("tone.wav");
    write_wav(&input, &generate_sine(220.0, 0.5, 0.3, 16_000)).unwrap();
    let out_dir = dir.path().join("presets");

    let output = cli()
        .args(["infer", "--input"])
        .arg(&input)
        .arg("--output-dir")
        .arg(&out_dir)
        .output()
        .expect("failed to run infer");
    assert!(
        output.status.success(),
        "CLI exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("infer report JSON");
    let preset = json["preset"].as_str().expect("preset path");
    assert!(preset.ends_with("tone.vital"));
    assert!(json["metrics"]["total_loss"].is_number());

    let document: Value =
        serde_json::from_slice(&std::fs::read(preset).expect("preset file")).expect("preset JSON");
    assert_eq!(document["settings"]["osc_1_transpose"], -3.0);
}

#[test]
fn features_emits_frames() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("tone.wav");
    write_wav(&input, &generate_sine(440.0, 0.5, 0.1, 16_000)).unwrap();

    let output = cli()
        .args(["features", "--input"])
        .arg(&input)
        .output()
        .expect("failed to run features");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("features JSON");
    assert_eq!(json["frames"].as_array().map(|f| f.len()), Some(10));
}

#[test]
fn missing_input_fails_with_exit_code_one() {
    let output = cli()
        .args(["infer", "--input", "/definitely/not/here.wav", "--no-eval"])
        .output()
        .expect("failed to run infer");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(stderr.contains("Error"), "expected error report, got {stderr}");
}
