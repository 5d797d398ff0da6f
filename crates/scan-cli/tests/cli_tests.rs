//! Runs the scanvol binary end to end.

use std::path::Path;
use std::process::{Command, Output};

fn scanvol(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_scanvol"))
        .args(args)
        .output()
        .expect("failed to run scanvol")
}

fn json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "scanvol failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

fn write_cube(dir: &Path, size: f64) -> (String, String) {
    let corners = [
        [0.0, 0.0, 0.0],
        [size, 0.0, 0.0],
        [size, size, 0.0],
        [0.0, size, 0.0],
        [0.0, 0.0, size],
        [size, 0.0, size],
        [size, size, size],
        [0.0, size, size],
    ];
    let mut xyz = String::new();
    let mut obj = String::new();
    for [x, y, z] in corners {
        xyz.push_str(&format!("{} {} {}\n", x, y, z));
        obj.push_str(&format!("v {} {} {}\n", x, y, z));
    }
    for [a, b, c] in [
        [1, 3, 2],
        [1, 4, 3],
        [5, 6, 7],
        [5, 7, 8],
        [1, 2, 6],
        [1, 6, 5],
        [4, 8, 7],
        [4, 7, 3],
        [1, 5, 8],
        [1, 8, 4],
        [2, 3, 7],
        [2, 7, 6],
    ] {
        obj.push_str(&format!("f {} {} {}\n", a, b, c));
    }

    let xyz_path = dir.join("cube.xyz");
    let obj_path = dir.join("cube.obj");
    std::fs::write(&xyz_path, xyz).unwrap();
    std::fs::write(&obj_path, obj).unwrap();
    (
        xyz_path.display().to_string(),
        obj_path.display().to_string(),
    )
}

fn frame(pixel_width: f64) -> String {
    format!(
        r#"{{"pixel_width": {}, "pixel_height": 110.0,
            "camera_transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1],
            "intrinsics": {{"fx": 1000.0, "fy": 1000.0, "cx": 320.0, "cy": 240.0}},
            "depth_sample": 0.5}}"#,
        pixel_width
    )
}

#[test]
fn test_config_prints_default_toml() {
    let output = scanvol(&["config"]);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("override_threshold"));
    assert!(text.contains("[grid]"));
}

#[test]
fn test_density_json() {
    let output = scanvol(&[
        "density",
        "--mass",
        "150",
        "--mass-sigma",
        "5",
        "--volume",
        "120",
        "--volume-sigma",
        "5",
        "--format",
        "json",
    ]);
    let value = json(&output);
    assert_eq!(value["status"], "estimated");
    assert!((value["density"].as_f64().unwrap() - 1250.0).abs() < 1e-6);
    assert_eq!(value["tier"], "fair");
}

#[test]
fn test_density_rejects_zero_volume() {
    let output = scanvol(&["density", "--mass", "150", "--volume", "0"]);
    assert!(!output.status.success());
}

#[test]
fn test_measure_direct_mesh() {
    let dir = tempfile::tempdir().unwrap();
    let (xyz, obj) = write_cube(dir.path(), 0.1);
    let output = scanvol(&[
        "measure",
        &xyz,
        "--strategy",
        "direct-mesh",
        "--mesh",
        &obj,
        "--mass",
        "1000",
        "--format",
        "json",
    ]);
    let value = json(&output);
    assert!((value["volume_ml"].as_f64().unwrap() - 1000.0).abs() < 1e-6);
    assert_eq!(value["source"]["kind"], "mesh");
    assert_eq!(value["density"]["status"], "estimated");
}

#[test]
fn test_calibration_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("frames.json");
    let store = dir.path().join("calibration.json");
    std::fs::write(
        &frames,
        format!("[{}, {}, {}]", frame(180.0), frame(175.0), frame(178.0)),
    )
    .unwrap();
    let store_arg = store.display().to_string();

    let output = scanvol(&[
        "calibrate",
        &frames.display().to_string(),
        "--reference",
        "credit_card",
        "--store",
        &store_arg,
        "--format",
        "json",
    ]);
    let value = json(&output);
    assert_eq!(value["result"]["valid_frame_count"], 3);
    assert_eq!(value["frames"][1]["angle"], "left");

    let shown = json(&scanvol(&["calibration", "show", "--store", &store_arg, "--format", "json"]));
    assert_eq!(shown["valid_now"], true);
    assert_eq!(shown["calibration"]["reference_id"], "credit_card");

    assert!(scanvol(&["calibration", "reset", "--store", &store_arg]).status.success());
    let cleared = json(&scanvol(&["calibration", "show", "--store", &store_arg, "--format", "json"]));
    assert!(cleared["calibration"].is_null());
}

#[test]
fn test_calibrate_unknown_reference() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("frames.json");
    std::fs::write(&frames, format!("[{}]", frame(180.0))).unwrap();
    let output = scanvol(&["calibrate", &frames.display().to_string(), "--reference", "banana"]);
    assert!(!output.status.success());
}
