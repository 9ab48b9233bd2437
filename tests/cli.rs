//! Integration tests for the picpool CLI.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn picpool() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("picpool").unwrap();
    cmd.env_remove("PICPOOL_LOG")
        .env_remove("RUST_LOG")
        .env_remove("PICPOOL_SETTINGS")
        .env_remove("PICPOOL_WORKERS");
    cmd
}

fn write_png(path: &Path) {
    let img = image::RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 90]));
    img.save(path).unwrap();
}

#[test]
fn test_help_displays() {
    picpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compress"))
        .stdout(predicate::str::contains("Run as a pool worker").not());
}

#[test]
fn test_version_displays() {
    picpool()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("picpool"));
}

#[test]
fn test_compress_requires_paths() {
    picpool().arg("compress").assert().failure();
}

#[test]
fn test_compress_json_output() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    write_png(&a);
    write_png(&b);

    let output = picpool()
        .args(["compress", "--format", "json", "-j", "2", "--output-mode", "new-file"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    for result in results {
        assert_eq!(result["status"], "Success");
        assert!(result["output_path"].as_str().unwrap().ends_with("_compressed.png"));
    }
    assert!(dir.path().join("a_compressed.png").exists());
    assert!(dir.path().join("b_compressed.png").exists());
}

#[test]
fn test_compress_table_output() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.png");
    write_png(&a);

    picpool()
        .args(["--no-color", "compress", "--no-progress", "--ascii", "-j", "1"])
        .arg(&a)
        .assert()
        .success()
        .stdout(predicate::str::contains("a.png"))
        .stdout(predicate::str::contains("Compressed 1 of 1 files"));
}

#[test]
fn test_failed_file_sets_exit_code() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("a.png");
    let bad = dir.path().join("b.bmp");
    write_png(&good);
    std::fs::write(&bad, b"BM").unwrap();

    picpool()
        .args(["compress", "--format", "json", "-j", "1"])
        .arg(&good)
        .arg(&bad)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Unsupported codec: bmp"))
        .stderr(predicate::str::contains("1 of 2 files failed"));
}

#[test]
fn test_empty_directory_reports_nothing_found() {
    let dir = tempdir().unwrap();
    picpool()
        .args(["--no-color", "compress"])
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("No images found."));
}

#[test]
fn test_settings_file_is_applied() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.png");
    write_png(&a);
    let settings = dir.path().join("settings.json");
    std::fs::write(
        &settings,
        r#"{"output_mode":"save_as_new_file","save_as_file_suffix":"_min"}"#,
    )
    .unwrap();

    picpool()
        .args(["compress", "--format", "json", "-j", "1", "--settings"])
        .arg(&settings)
        .arg(&a)
        .assert()
        .success();
    assert!(dir.path().join("a_min.png").exists());
}

#[test]
fn test_invalid_settings_file_fails() {
    let dir = tempdir().unwrap();
    let settings = dir.path().join("settings.json");
    std::fs::write(&settings, "{ not json").unwrap();

    picpool()
        .args(["--no-color", "compress", "--settings"])
        .arg(&settings)
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load settings"));
}

#[test]
fn test_missing_output_folder_is_per_file_failure() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.png");
    write_png(&a);

    picpool()
        .args(["compress", "--format", "json", "-j", "1", "--output-dir"])
        .arg(dir.path().join("nope"))
        .arg(&a)
        .assert()
        .failure()
        .stdout(predicate::str::contains("does not exist"));
}

#[test]
fn test_verbose_conflicts_with_quiet() {
    picpool()
        .args(["-q", "-v", "compress", "a.png"])
        .assert()
        .failure();
}

#[test]
fn test_worker_answers_ready_and_exits() {
    picpool()
        .arg("worker")
        .write_stdin("{\"type\":\"exit\"}\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("{\"type\":\"ready\"}"));
}
