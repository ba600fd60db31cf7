#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/bulklink-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn bulklink() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_bulklink"));
    command.arg("--log-level").arg("error");
    command
}

fn spawn_emulator(sock_path: &Path, extra: &[&str]) -> Child {
    let child = bulklink()
        .arg("--format")
        .arg("json")
        .arg("emulate")
        .arg(sock_path)
        .arg("--once")
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("emulate command should start");
    wait_for_socket(sock_path, Duration::from_secs(3));
    child
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        assert!(start.elapsed() < timeout, "socket did not appear");
        thread::sleep(Duration::from_millis(25));
    }
}

fn finish(child: Child) -> Output {
    child
        .wait_with_output()
        .expect("emulator should exit after its client")
}

#[test]
fn probe_prints_session_and_profile() {
    let dir = unique_temp_dir("probe");
    let sock_path = dir.join("device.sock");
    let emulator = spawn_emulator(&sock_path, &["--session-id", "probe-42", "--profile", "model=x1"]);

    let output = bulklink()
        .arg("--format")
        .arg("json")
        .arg("probe")
        .arg(&sock_path)
        .output()
        .expect("probe should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("probe output should be json");
    assert_eq!(report["session_id"], "probe-42");
    assert_eq!(report["profile"]["model"], "x1");

    let emulated = finish(emulator);
    assert!(emulated.status.success());
    let stats: serde_json::Value =
        serde_json::from_slice(&emulated.stdout).expect("emulator output should be json");
    assert_eq!(stats["handshakes"], 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_with_wait_prints_echo() {
    let dir = unique_temp_dir("send");
    let sock_path = dir.join("device.sock");
    let emulator = spawn_emulator(&sock_path, &[]);

    let output = bulklink()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&sock_path)
        .arg("--type")
        .arg("robot")
        .arg("--json")
        .arg(r#"{"cmd":"home","speed":3}"#)
        .arg("--wait")
        .output()
        .expect("send should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send output should be json");
    assert_eq!(report["channel"], 0);
    assert_eq!(report["reply"]["cmd"], "home");
    assert_eq!(report["reply"]["speed"], 3);

    let emulated = finish(emulator);
    let stats: serde_json::Value =
        serde_json::from_slice(&emulated.stdout).expect("emulator output should be json");
    assert_eq!(stats["objects_echoed"], 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn refused_open_exits_with_failure() {
    let dir = unique_temp_dir("refuse");
    let sock_path = dir.join("device.sock");
    let emulator = spawn_emulator(&sock_path, &["--refuse", "camera"]);

    let output = bulklink()
        .arg("send")
        .arg(&sock_path)
        .arg("--type")
        .arg("camera")
        .arg("--json")
        .arg("{}")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("CHANNEL_OPEN_FAILED"), "stderr: {stderr}");

    let _ = finish(emulator);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn upload_sends_every_block() {
    let dir = unique_temp_dir("upload");
    let sock_path = dir.join("device.sock");
    let file = dir.join("firmware.bin");
    std::fs::write(&file, vec![0xA5u8; 10_000]).expect("payload file should be writable");
    let emulator = spawn_emulator(&sock_path, &[]);

    let output = bulklink()
        .arg("--format")
        .arg("json")
        .arg("upload")
        .arg(&sock_path)
        .arg("--file")
        .arg(&file)
        .arg("--chunk")
        .arg("4096")
        .output()
        .expect("upload should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("upload output should be json");
    assert_eq!(report["bytes"], 10_000);
    assert_eq!(report["blocks"], 3);

    let emulated = finish(emulator);
    let stats: serde_json::Value =
        serde_json::from_slice(&emulated.stdout).expect("emulator output should be json");
    assert_eq!(stats["binary_blocks"], 3);
    assert_eq!(stats["binary_bytes"], 10_000);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn probe_missing_socket_times_out_with_124() {
    let missing = PathBuf::from(format!(
        "/tmp/bulklink-cli-missing-{}-{}.sock",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));

    let output = bulklink()
        .arg("probe")
        .arg(&missing)
        .arg("--timeout")
        .arg("1s")
        .output()
        .expect("probe should run");

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn invalid_duration_is_usage_error() {
    let output = bulklink()
        .arg("probe")
        .arg("/tmp/unused.sock")
        .arg("--timeout")
        .arg("soon")
        .output()
        .expect("probe should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_crate_version() {
    let output = bulklink()
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("bulklink {}", env!("CARGO_PKG_VERSION")));

    let output = bulklink()
        .arg("version")
        .arg("--extended")
        .output()
        .expect("version should run");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("build_target:"));
    assert!(stdout.contains("max_payload: 65531 bytes"));
}
