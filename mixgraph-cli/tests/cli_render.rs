use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn mixgraph() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("mixgraph"))
}

/// Constant 0.5 into `master`, plus a recorded submix and an external capture.
const GRAPH: &str = r#"{
    "mixer": { "sample_rate": 48000, "channels": 2, "frames_per_callback": 64 },
    "submixes": [
        { "name": "master", "record": true },
        { "name": "bus", "parent": "master", "output_volume": "-6db" },
        { "name": "stream", "endpoint": "external" }
    ],
    "sources": [
        {
            "name": "dc",
            "generator": { "type": "samples", "samples": [0.5], "looping": true },
            "sends": [
                { "submix": "master" },
                { "submix": "stream", "level": 0.25 }
            ]
        }
    ]
}"#;

fn write_graph(dir: &TempDir, json: &str) -> String {
    let path = dir.path().join("graph.json");
    std::fs::write(&path, json).unwrap();
    path.to_string_lossy().into_owned()
}

fn read_float_wav(path: &Path) -> (hound::WavSpec, Vec<f32>) {
    let mut reader = hound::WavReader::open(path).unwrap();
    let spec = reader.spec();
    let samples = reader.samples::<f32>().map(Result::unwrap).collect();
    (spec, samples)
}

#[test]
fn create_example_graph_outputs_json() {
    mixgraph()
        .args(["create", "example-graph"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"master\""))
        .stdout(predicate::str::contains("GainSettings"))
        .stdout(predicate::str::contains("\"sine\""));
}

#[test]
fn create_mixer_config_outputs_defaults() {
    mixgraph()
        .args(["create", "mixer-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"frames_per_callback\": 512"));
}

#[test]
fn example_graph_round_trips_through_describe() {
    let dir = TempDir::new().unwrap();
    let output = mixgraph()
        .args(["create", "example-graph"])
        .output()
        .unwrap();
    let graph = write_graph(&dir, &String::from_utf8(output.stdout).unwrap());

    mixgraph()
        .args(["describe", &graph])
        .assert()
        .success()
        .stdout(predicate::str::contains("master [master, envelope]"))
        .stdout(predicate::str::contains("music [1 effects]"));
}

#[test]
fn render_writes_main_output_recording_and_capture() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(&dir, GRAPH);
    let out = dir.path().join("mix.wav");

    mixgraph()
        .args(["render", &graph, "--seconds", "0.1", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("rendered 75 callbacks"));

    // 0.1 s at 48 kHz is exactly 75 callbacks of 64 frames.
    let (spec, samples) = read_float_wav(&out);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 48_000);
    assert_eq!(samples.len(), 4800 * 2);
    assert!(samples.iter().all(|s| (s - 0.5).abs() < 1e-6));

    let (_, recorded) = read_float_wav(&dir.path().join("mix.record-master.wav"));
    assert_eq!(recorded.len(), samples.len());

    let (_, captured) = read_float_wav(&dir.path().join("mix.capture-stream.wav"));
    assert_eq!(captured.len(), samples.len());
    assert!(captured.iter().all(|s| (s - 0.125).abs() < 1e-6));
}

#[test]
fn render_int16_output() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(&dir, GRAPH);
    let out = dir.path().join("mix16.wav");

    mixgraph()
        .args(["render", &graph, "--seconds", "0.01", "--format", "int16", "-q", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let mut reader = hound::WavReader::open(&out).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 16);
    let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|&s| s == 16383));
}

#[test]
fn invalid_graph_is_rejected() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(
        &dir,
        r#"{ "submixes": [
            { "name": "a", "parent": "b" },
            { "name": "b", "parent": "a" }
        ] }"#,
    );
    mixgraph()
        .args(["describe", &graph])
        .assert()
        .failure()
        .stderr(predicate::str::contains("own ancestor"));
}

#[test]
fn missing_graph_file_fails() {
    mixgraph()
        .args(["render", "/nonexistent/graph.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("io error"));
}

#[test]
fn print_log_dumps_captured_lines() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(&dir, GRAPH);
    let out = dir.path().join("logged.wav");

    mixgraph()
        .env_remove("RUST_LOG")
        .args(["render", &graph, "--seconds", "0.01", "-q", "--print-log", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("[INFO] built graph: 3 submixes, 1 sources"));
}
