//! CLI surface checks; no external tools or models are needed because
//! every invocation here fails or finishes before the pipeline starts.

use assert_cmd::Command;
use predicates::prelude::*;

/// Command with config and home directories pointed at a throwaway dir.
fn reelscribe(home: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("reelscribe").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .current_dir(home.path());
    cmd
}

#[test]
fn help_lists_the_commands() {
    let home = tempfile::tempdir().unwrap();
    reelscribe(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("transcribe"))
        .stdout(predicate::str::contains("backends"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn backends_lists_providers_and_platforms() {
    let home = tempfile::tempdir().unwrap();
    reelscribe(&home)
        .arg("backends")
        .assert()
        .success()
        .stdout(predicate::str::contains("local"))
        .stdout(predicate::str::contains("remote"))
        .stdout(predicate::str::contains("Instagram"))
        .stdout(predicate::str::contains("Direct URL"));
}

#[test]
fn config_show_prints_the_defaults() {
    let home = tempfile::tempdir().unwrap();
    reelscribe(&home)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Current Configuration:"))
        .stdout(predicate::str::contains("Backend: local"))
        .stdout(predicate::str::contains("Max File Size: 200 MB"));
}

#[test]
fn config_creates_the_default_file() {
    let home = tempfile::tempdir().unwrap();
    reelscribe(&home).arg("config").assert().success();

    let config_file = home.path().join("config/reelscribe/config.yaml");
    assert!(config_file.exists());
    let content = fs_err::read_to_string(config_file).unwrap();
    assert!(content.contains("max_file_size_mb: 200"));
}

#[test]
fn transcribe_rejects_unsupported_urls() {
    let home = tempfile::tempdir().unwrap();
    reelscribe(&home)
        .args(["--quiet", "transcribe", "https://example.com/some/page"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported URL format"));
}

#[test]
fn transcribe_rejects_instagram_pages_that_are_not_posts() {
    let home = tempfile::tempdir().unwrap();
    reelscribe(&home)
        .args(["--quiet", "transcribe", "https://www.instagram.com/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported URL format"));
}

#[test]
fn transcribe_rejects_missing_local_files() {
    let home = tempfile::tempdir().unwrap();
    reelscribe(&home)
        .args(["--quiet", "transcribe", "./no-such-clip.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("File does not exist"));
}

#[test]
fn transcribe_validates_the_format_flag() {
    let home = tempfile::tempdir().unwrap();
    reelscribe(&home)
        .args(["transcribe", "clip.mp4", "--format", "yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
