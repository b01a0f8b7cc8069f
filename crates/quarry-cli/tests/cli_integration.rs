//! CLI subprocess integration tests.
//!
//! These tests invoke the `quarry` binary as a subprocess and verify exit
//! codes, stdout content, and JSON output stability.

use quarry_store::sha256_bytes;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const HELLO_WORLD_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

/// Binary with an isolated HOME so no user policy file leaks in.
fn quarry_bin(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_quarry"));
    cmd.env("HOME", home)
        .env_remove("QUARRY_FORCE_OFFLINE")
        .env_remove("QUARRY_LOG");
    cmd
}

fn json_stdout(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {stdout}"))
}

fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Mirror directory holding one archive and a repository manifest next to it.
fn local_mirror(dir: &Path) -> PathBuf {
    let mirror = dir.join("mirror");
    std::fs::create_dir_all(mirror.join("pool")).unwrap();
    let archive = tar_bytes(&[("bin/godot", b"godot binary")]);
    std::fs::write(mirror.join("pool/godot-4.3.tar"), &archive).unwrap();
    let manifest = mirror.join("index.json");
    std::fs::write(
        &manifest,
        serde_json::json!({
            "schema_version": 1,
            "name": "local",
            "tools": [{
                "id": "godot",
                "version": "4.3",
                "archive_path": "pool/godot-4.3.tar",
                "sha256": sha256_bytes(&archive),
                "size": archive.len(),
            }],
        })
        .to_string(),
    )
    .unwrap();
    manifest
}

#[test]
fn cli_version_exits_zero() {
    let home = tempfile::tempdir().unwrap();
    let output = quarry_bin(home.path()).arg("--version").output().unwrap();
    assert!(output.status.success(), "quarry --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("quarry"), "version output: {stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = quarry_bin(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["hydrate", "validate", "hash", "list", "fetch", "policy"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_hydrate_requires_tools() {
    let home = tempfile::tempdir().unwrap();
    let output = quarry_bin(home.path())
        .args(["hydrate", "--manifest", "index.json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_rejects_malformed_tool_request() {
    let home = tempfile::tempdir().unwrap();
    let output = quarry_bin(home.path())
        .args(["hydrate", "--manifest", "index.json", "godot"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("<id>@<version>"), "stderr: {stderr}");
}

#[test]
fn cli_validate_accepts_valid_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = local_mirror(dir.path());
    let output = quarry_bin(dir.path())
        .args(["--json", "validate"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let json = json_stdout(&output);
    assert_eq!(json["valid"], true);
    assert_eq!(json["kind"], "repository");
    assert_eq!(json["tools"][0]["id"], "godot");
}

#[test]
fn cli_validate_reports_every_issue() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("bad.json");
    std::fs::write(&manifest, r#"{"name": "bad", "tools": []}"#).unwrap();
    let output = quarry_bin(dir.path())
        .args(["--json", "validate"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let json = json_stdout(&output);
    assert_eq!(json["valid"], false);
    let issues: Vec<&str> = json["issues"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(serde_json::Value::as_str)
        .collect();
    assert!(issues.contains(&"schema_version_missing"), "{issues:?}");
    assert!(issues.contains(&"tools_empty"), "{issues:?}");
}

#[test]
fn cli_validate_stack_requires_path() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = local_mirror(dir.path());
    let output = quarry_bin(dir.path())
        .args(["--json", "validate", "--stack"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(json_stdout(&output)["valid"], false);
}

#[test]
fn cli_validate_missing_file_is_manifest_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = quarry_bin(dir.path())
        .args(["validate"])
        .arg(dir.path().join("absent.json"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read manifest"), "stderr: {stderr}");
}

#[test]
fn cli_hash_prints_digest() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("hello.txt");
    std::fs::write(&file, "hello world").unwrap();
    let output = quarry_bin(dir.path()).arg("hash").arg(&file).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with(HELLO_WORLD_SHA256));
}

#[test]
fn cli_hash_expect_mismatch_fails() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("hello.txt");
    std::fs::write(&file, "hello world").unwrap();

    let ok = quarry_bin(dir.path())
        .args(["--json", "hash", "--expect", HELLO_WORLD_SHA256.to_uppercase().as_str()])
        .arg(&file)
        .output()
        .unwrap();
    assert_eq!(ok.status.code(), Some(0));
    assert_eq!(json_stdout(&ok)["verified"], true);

    let bad = quarry_bin(dir.path())
        .args(["--json", "hash", "--expect", "0".repeat(64).as_str()])
        .arg(&file)
        .output()
        .unwrap();
    assert_eq!(bad.status.code(), Some(1));
    assert_eq!(json_stdout(&bad)["verified"], false);
}

#[test]
fn cli_hydrate_installs_from_local_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = local_mirror(dir.path());
    let library = dir.path().join("library");

    let output = quarry_bin(dir.path())
        .args(["--json", "hydrate", "--manifest"])
        .arg(&manifest)
        .arg("--library")
        .arg(&library)
        .arg("godot@4.3")
        .output()
        .unwrap();
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = json_stdout(&output);
    assert_eq!(report["success"], true);
    assert_eq!(report["installed_count"], 1);
    assert_eq!(report["results"][0]["status"], "installed");
    assert_eq!(
        std::fs::read(library.join("godot/4.3/bin/godot")).unwrap(),
        b"godot binary"
    );

    let listed = quarry_bin(dir.path())
        .args(["--json", "list", "--library"])
        .arg(&library)
        .output()
        .unwrap();
    assert!(listed.status.success());
    let tools = json_stdout(&listed);
    assert_eq!(tools[0]["id"], "godot");
    assert_eq!(tools[0]["versions"][0], "4.3");
}

#[test]
fn cli_hydrate_partial_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = local_mirror(dir.path());
    let output = quarry_bin(dir.path())
        .args(["--json", "hydrate", "--manifest"])
        .arg(&manifest)
        .arg("--library")
        .arg(dir.path().join("library"))
        .args(["godot@4.3", "krita@5.2"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    let report = json_stdout(&output);
    assert_eq!(report["failed_count"], 1);
    assert_eq!(report["failed_tools"][0]["id"], "krita");
    assert!(report["results"][1]["reason"]
        .as_str()
        .unwrap()
        .contains("not listed in the manifest"));
}

#[test]
fn cli_hydrate_offline_is_policy_error() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = local_mirror(dir.path());
    let library = dir.path().join("library");
    let output = quarry_bin(dir.path())
        .args(["--json", "hydrate", "--offline", "--manifest"])
        .arg(&manifest)
        .arg("--library")
        .arg(&library)
        .arg("godot@4.3")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    let report = json_stdout(&output);
    assert_eq!(report["batch_failure"]["kind"], "policy");
    assert_eq!(report["failed_count"], 1);
    assert!(!library.join("godot").exists());
}

#[test]
fn cli_hydrate_invalid_manifest_is_manifest_error() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("index.json");
    std::fs::write(&manifest, r#"{"schema_version": 2, "name": "x", "tools": []}"#).unwrap();
    let output = quarry_bin(dir.path())
        .args(["--json", "hydrate", "--manifest"])
        .arg(&manifest)
        .arg("--library")
        .arg(dir.path().join("library"))
        .arg("godot@4.3")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let report = json_stdout(&output);
    assert_eq!(report["batch_failure"]["kind"], "manifest");
}

#[test]
fn cli_list_empty_library() {
    let dir = tempfile::tempdir().unwrap();
    let output = quarry_bin(dir.path())
        .args(["list", "--library"])
        .arg(dir.path().join("nothing"))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("no tools installed"));
}

#[test]
fn cli_policy_show_applies_flags() {
    let home = tempfile::tempdir().unwrap();
    let output = quarry_bin(home.path())
        .args(["--json", "policy", "show", "--allow-port", "443", "--allow-host", "Mirror.Local"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let policy = json_stdout(&output);
    assert_eq!(policy["offline_mode"], false);
    assert_eq!(policy["allowed_ports"][0], 443);
    assert_eq!(policy["allowed_hosts"][0], "mirror.local");
}

#[test]
fn cli_policy_check_reports_decision() {
    let home = tempfile::tempdir().unwrap();
    let allowed = quarry_bin(home.path())
        .args(["--json", "policy", "check", "https://mirror.local/index.json"])
        .output()
        .unwrap();
    assert_eq!(allowed.status.code(), Some(0));
    let json = json_stdout(&allowed);
    assert_eq!(json["allowed"], true);
    assert_eq!(json["port"], 443);

    let denied = quarry_bin(home.path())
        .args([
            "--json",
            "policy",
            "check",
            "https://mirror.local/index.json",
            "--allow-port",
            "8080",
        ])
        .output()
        .unwrap();
    assert_eq!(denied.status.code(), Some(3));
    assert_eq!(json_stdout(&denied)["allowed"], false);
}

#[test]
fn cli_policy_file_and_env_switch() {
    let home = tempfile::tempdir().unwrap();
    let policy = home.path().join("policy.json");
    std::fs::write(&policy, r#"{"offline_mode": true}"#).unwrap();
    let output = quarry_bin(home.path())
        .arg("--policy")
        .arg(&policy)
        .args(["policy", "check", "http://mirror.local/"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));

    let forced = quarry_bin(home.path())
        .env("QUARRY_FORCE_OFFLINE", "1")
        .args(["--json", "policy", "show"])
        .output()
        .unwrap();
    assert_eq!(json_stdout(&forced)["force_offline"], true);
}

/// One-shot HTTP server answering a single GET with `body`.
fn serve_once(body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/tool.tar", listener.local_addr().unwrap());
    std::thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                break;
            }
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = stream.write_all(head.as_bytes());
        let _ = stream.write_all(body);
    });
    url
}

#[test]
fn cli_fetch_downloads_through_gate() {
    let dir = tempfile::tempdir().unwrap();
    let url = serve_once(b"hello world");
    let dest = dir.path().join("out/tool.tar");
    let output = quarry_bin(dir.path())
        .args(["--json", "fetch", url.as_str(), "-o"])
        .arg(&dest)
        .output()
        .unwrap();
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json = json_stdout(&output);
    assert_eq!(json["bytes"], 11);
    assert_eq!(json["sha256"], HELLO_WORLD_SHA256);
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
}

#[test]
fn cli_fetch_offline_never_writes() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("tool.tar");
    let output = quarry_bin(dir.path())
        .args(["fetch", "http://127.0.0.1:9/tool.tar", "--offline", "-o"])
        .arg(&dest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(!dest.exists());
}
