use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::fs;

#[test]
fn no_packages_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = cargo_bin_cmd!("dlpipkle")
        .current_dir(temp.path())
        .arg("--no-color")
        .assert()
        .code(1);
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    assert!(stdout.contains("no packages specified"), "stdout: {stdout}");
}

#[test]
fn json_envelope_reports_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = cargo_bin_cmd!("dlpipkle")
        .current_dir(temp.path())
        .args(["--json", "-r", "missing.txt"])
        .assert()
        .code(1);
    let payload: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json output");
    assert_eq!(payload["status"], "user_error");
    assert!(payload["message"]
        .as_str()
        .expect("message")
        .contains("failed to read requirements file"));
}

#[test]
fn uncreatable_destination_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let blocker = temp.path().join("occupied");
    fs::write(&blocker, b"").expect("write blocker");
    let assert = cargo_bin_cmd!("dlpipkle")
        .current_dir(temp.path())
        .env("DLPIPKLE_INDEX_URL", "http://127.0.0.1:9/pypi")
        .args(["requests", "--dest"])
        .arg(blocker.join("wheels"))
        .assert()
        .code(1);
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    assert!(stdout.contains("cannot create destination"), "stdout: {stdout}");
}

#[test]
fn invalid_index_url_is_a_user_error() {
    cargo_bin_cmd!("dlpipkle")
        .args(["requests", "--print-dep-tree", "--index-url", "ftp://mirror.example"])
        .assert()
        .code(1);
}

#[test]
fn quiet_failure_goes_to_stderr() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = cargo_bin_cmd!("dlpipkle")
        .current_dir(temp.path())
        .arg("-q")
        .assert()
        .code(1);
    let output = assert.get_output();
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no packages specified"));
}
