//! Command line tests for the `rbak` helper subcommands and the `rbakd` worker.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn rbak() -> Command {
    Command::cargo_bin("rbak").unwrap()
}

fn rotations(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_help_runs() {
    rbak().arg("--help").assert().success();
    Command::cargo_bin("rbakd")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn test_version_runs() {
    rbak().arg("--version").assert().success();
}

#[test]
fn test_run_requires_a_script() {
    rbak().arg("run").assert().failure();
}

#[test]
fn test_run_with_missing_script_fails() {
    let tmp = tempfile::tempdir().unwrap();
    rbak()
        .args(["run"])
        .arg(tmp.path().join("missing.yaml"))
        .assert()
        .code(1);
}

// ============================================================================
// rotate
// ============================================================================

#[test]
fn test_rotate_without_snapshot_exits_10() {
    let tmp = tempfile::tempdir().unwrap();
    rbak()
        .arg("--root")
        .arg(tmp.path())
        .arg("rotate")
        .assert()
        .code(10);
    assert!(rotations(tmp.path()).is_empty());
}

#[test]
fn test_rotate_moves_snapshot_and_links_latest() {
    let tmp = tempfile::tempdir().unwrap();
    let snapshot = tmp.path().join("latest.snapshot");
    std::fs::create_dir(&snapshot).unwrap();
    std::fs::write(snapshot.join("file"), "data").unwrap();
    rbak()
        .arg("--root")
        .arg(tmp.path())
        .args(["rotate", "--format", "backup-%Y"])
        .assert()
        .success();
    let year = chrono::Utc::now().format("%Y").to_string();
    let rotated = format!("backup-{year}");
    assert_eq!(rotations(tmp.path()), vec![rotated.clone(), "latest".to_string()]);
    assert_eq!(
        std::fs::read_link(tmp.path().join("latest")).unwrap(),
        Path::new(&rotated)
    );
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("latest").join("file")).unwrap(),
        "data"
    );
}

#[test]
fn test_rotate_onto_existing_rotation_exits_20() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir(tmp.path().join("latest.snapshot")).unwrap();
    std::fs::create_dir(tmp.path().join("fixed")).unwrap();
    rbak()
        .arg("--root")
        .arg(tmp.path())
        .args(["rotate", "--format", "fixed"])
        .assert()
        .code(20);
    assert!(tmp.path().join("latest.snapshot").is_dir());
    assert!(!tmp.path().join("latest").exists());
}

#[test]
fn test_rotate_custom_names() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir(tmp.path().join("incoming")).unwrap();
    rbak()
        .arg("--root")
        .arg(tmp.path())
        .args([
            "rotate",
            "--snapshot",
            "incoming",
            "--latest",
            "current",
            "--format",
            "one",
        ])
        .assert()
        .success();
    assert_eq!(
        std::fs::read_link(tmp.path().join("current")).unwrap(),
        Path::new("one")
    );
}

// ============================================================================
// prune
// ============================================================================

#[test]
fn test_prune_dry_run_lists_plan() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["2024.03.01-00.00.00", "2024.03.01-06.00.00", "2024.03.02-00.00.00"] {
        std::fs::create_dir(tmp.path().join(name)).unwrap();
    }
    rbak()
        .arg("--root")
        .arg(tmp.path())
        .args(["prune", "--dry", "--hourly", "0", "--weekly", "0", "--monthly", "0"])
        .args(["--quarterly", "0", "--yearly", "0", "--daily", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("*** Pruning backups (dry run) ***"))
        .stdout(predicate::str::contains(
            "Keeping:\n\t2024.03.02-00.00.00\n\t2024.03.01-00.00.00\nErasing:\n\t2024.03.01-06.00.00\n",
        ));
    assert_eq!(rotations(tmp.path()).len(), 3);
}

#[test]
fn test_prune_erases_and_spares_latest() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["2024.03.01-00.00.00", "2024.03.02-00.00.00", "2024.03.03-00.00.00"] {
        std::fs::create_dir(tmp.path().join(name)).unwrap();
    }
    std::os::unix::fs::symlink("2024.03.01-00.00.00", tmp.path().join("latest")).unwrap();
    rbak()
        .arg("--root")
        .arg(tmp.path())
        .args(["prune", "--hourly", "0", "--weekly", "0", "--monthly", "0"])
        .args(["--quarterly", "0", "--yearly", "0", "--daily", "1"])
        .assert()
        .success();
    assert_eq!(
        rotations(tmp.path()),
        vec!["2024.03.01-00.00.00", "2024.03.03-00.00.00", "latest"]
    );
}

#[test]
fn test_prune_keep_value_is_validated() {
    rbak().args(["prune", "--keep", "newest"]).assert().failure();
    rbak()
        .args(["prune", "--keep", "new", "--help"])
        .assert()
        .success();
}

// ============================================================================
// spawn
// ============================================================================

#[test]
fn test_spawn_runs_in_root() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    rbak()
        .arg("--root")
        .arg(&root)
        .args(["spawn", "--", "pwd"])
        .assert()
        .success()
        .stdout(format!("{}\n", root.display()));
}

#[test]
fn test_spawn_passes_exit_status_and_flags() {
    rbak()
        .args(["spawn", "sh", "-c", "exit 7"])
        .assert()
        .code(7);
}

#[test]
fn test_spawn_missing_program_exits_127() {
    rbak()
        .args(["spawn", "rbak-no-such-program"])
        .assert()
        .code(127);
}

#[test]
fn test_root_must_exist() {
    rbak()
        .args(["--root", "/nonexistent/rbak/root", "spawn", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot change directory"));
}

// ============================================================================
// rbakd
// ============================================================================

#[test]
fn test_worker_reports_protocol_version() {
    let output = Command::cargo_bin("rbakd")
        .unwrap()
        .arg("--protocol-version")
        .output()
        .unwrap();
    assert!(output.status.success());
    let version: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(version.get("semantic").is_some());
}

#[test]
fn test_worker_session_over_stdio() {
    let tmp = tempfile::tempdir().unwrap();
    let requests = format!(
        "{}\n{}\n{}\n",
        serde_json::json!({"request": "set_working_dir", "path": tmp.path()}),
        serde_json::json!({"request": "mkdir_p", "path": "a/b"}),
        serde_json::json!({"request": "run_command", "argv": ["echo", "hello"]}),
    );
    let output = Command::cargo_bin("rbakd")
        .unwrap()
        .write_stdin(requests)
        .output()
        .unwrap();
    assert!(output.status.success());
    let responses: Vec<serde_json::Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .filter(|response: &serde_json::Value| response["response"] != "log")
        .collect();
    assert_eq!(responses[0]["response"], "ready");
    let dones: Vec<_> = responses
        .iter()
        .filter(|response| response["response"] == "done")
        .collect();
    assert_eq!(dones.len(), 3);
    assert!(dones.iter().all(|done| done["status"] == 0));
    assert!(
        responses
            .iter()
            .any(|response| response["response"] == "output" && response["line"] == "hello")
    );
    assert!(tmp.path().join("a/b").is_dir());
}
