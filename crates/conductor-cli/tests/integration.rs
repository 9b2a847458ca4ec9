#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn conductor(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("conductor").unwrap();
    cmd.current_dir(dir.path())
        .env("CONDUCTOR_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn init_project(dir: &TempDir) {
    conductor(dir).arg("init").assert().success();
}

fn create_unit(dir: &TempDir, id: &str) {
    conductor(dir)
        .args(["unit", "create", id, "--title", "Payments"])
        .assert()
        .success();
}

fn write_script(dir: &TempDir, lines: &[&str]) -> std::path::PathBuf {
    let path = dir.path().join("script.jsonl");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn unit_json(dir: &TempDir, id: &str) -> serde_json::Value {
    let out = conductor(dir)
        .args(["--json", "unit", "show", id])
        .output()
        .unwrap();
    assert!(out.status.success());
    serde_json::from_slice(&out.stdout).unwrap()
}

const WRITE_BRIEF: &str = r##"{"thought": "draft", "action": {"name": "write_file", "args": {"path": "artifacts/brief.md", "content": "# Brief"}}}"##;
const FINISH: &str = r#"{"thought": "done", "action": {"name": "finish", "args": {"output": "brief written"}}}"#;

// ---------------------------------------------------------------------------
// conductor init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_layout() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    assert!(dir.path().join(".conductor/config.yaml").exists());
    assert!(dir.path().join(".conductor/units").is_dir());
    assert!(dir.path().join(".conductor/prompts/base/shared.md").exists());
    assert!(dir.path().join(".conductor/prompts/base/analyst.md").exists());
}

#[test]
fn init_is_idempotent_and_keeps_edits() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let shared = dir.path().join(".conductor/prompts/base/shared.md");
    std::fs::write(&shared, "custom\n").unwrap();
    init_project(&dir);
    assert_eq!(std::fs::read_to_string(&shared).unwrap(), "custom\n");
}

#[test]
fn commands_before_init_fail_with_hint() {
    let dir = TempDir::new().unwrap();
    conductor(&dir)
        .args(["unit", "create", "pay"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("conductor init"));
}

// ---------------------------------------------------------------------------
// conductor unit
// ---------------------------------------------------------------------------

#[test]
fn unit_create_list_show() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_unit(&dir, "pay");

    conductor(&dir)
        .args(["unit", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pay").and(predicate::str::contains("analysis")));

    let v = unit_json(&dir, "pay");
    assert_eq!(v["unit"]["phase"], "analysis");
    assert_eq!(v["unit"]["status"], "draft");
}

#[test]
fn unit_create_rejects_bad_slug_and_duplicates() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    conductor(&dir)
        .args(["unit", "create", "Bad Slug"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid slug"));
    create_unit(&dir, "pay");
    conductor(&dir)
        .args(["unit", "create", "pay"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn archived_unit_leaves_the_list() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_unit(&dir, "pay");
    conductor(&dir).args(["unit", "archive", "pay"]).assert().success();
    assert!(dir.path().join(".conductor/archive/pay").is_dir());
    conductor(&dir)
        .args(["unit", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No units."));
}

// ---------------------------------------------------------------------------
// Phase gates
// ---------------------------------------------------------------------------

#[test]
fn advance_requires_artifact_and_approval() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_unit(&dir, "pay");

    conductor(&dir)
        .args(["advance", "pay"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("illegal transition"));

    std::fs::write(dir.path().join(".conductor/units/pay/artifacts/brief.md"), "# Brief").unwrap();
    conductor(&dir)
        .args(["advance", "pay"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("approv"));

    conductor(&dir).args(["approve", "pay", "--by", "lead"]).assert().success();
    conductor(&dir)
        .args(["advance", "pay"])
        .assert()
        .success()
        .stdout(predicate::str::contains("analysis -> planning"));
    assert_eq!(unit_json(&dir, "pay")["unit"]["phase"], "planning");
}

#[test]
fn reject_clears_approval_and_records_history() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_unit(&dir, "pay");
    conductor(&dir).args(["approve", "pay"]).assert().success();
    conductor(&dir)
        .args(["reject", "pay", "--reason", "too vague"])
        .assert()
        .success();
    let v = unit_json(&dir, "pay");
    assert_eq!(v["unit"]["approvals"].as_array().unwrap().len(), 0);
    assert_eq!(v["unit"]["history"][0]["note"], "too vague");
}

#[test]
fn blocked_unit_refuses_run_until_unblocked() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_unit(&dir, "pay");
    conductor(&dir)
        .args(["block", "pay", "--reason", "legal"])
        .assert()
        .success();

    let script = write_script(&dir, &[FINISH]);
    conductor(&dir)
        .args(["run", "pay", "--task", "t", "--script"])
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("blocked"));

    conductor(&dir).args(["unblock", "pay"]).assert().success();
    conductor(&dir)
        .args(["run", "pay", "--task", "t", "--script"])
        .arg(&script)
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// conductor run
// ---------------------------------------------------------------------------

#[test]
fn scripted_run_writes_artifact_and_awaits_approval() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_unit(&dir, "pay");
    let script = write_script(&dir, &[WRITE_BRIEF, FINISH]);

    let out = conductor(&dir)
        .args(["--json", "run", "pay", "--task", "write the brief", "--script"])
        .arg(&script)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["outcome"], "awaiting_approval");
    assert_eq!(v["output"], "brief written");
    assert_eq!(v["approved"], false);
    assert!(dir.path().join(".conductor/units/pay/artifacts/brief.md").exists());
    assert_eq!(unit_json(&dir, "pay")["unit"]["status"], "in_progress");
}

#[test]
fn approved_scripted_run_advances() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_unit(&dir, "pay");
    conductor(&dir).args(["approve", "pay"]).assert().success();
    let script = write_script(&dir, &[WRITE_BRIEF, FINISH]);

    conductor(&dir)
        .args(["run", "pay", "--task", "write the brief", "--script"])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("Advanced: analysis -> planning"));
}

// ---------------------------------------------------------------------------
// conductor memory
// ---------------------------------------------------------------------------

#[test]
fn frozen_lists_every_step_of_a_run() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_unit(&dir, "pay");
    let script = write_script(&dir, &[WRITE_BRIEF, FINISH]);
    conductor(&dir)
        .args(["run", "pay", "--task", "t", "--script"])
        .arg(&script)
        .assert()
        .success();

    let out = conductor(&dir)
        .args(["--json", "memory", "frozen", "pay"])
        .output()
        .unwrap();
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let frags = v.as_array().unwrap();
    assert_eq!(frags.len(), 2);
    assert_eq!(frags[0]["origin"], "observation");
    assert_eq!(frags[1]["origin"], "thought");
}

#[test]
fn compact_without_pressure_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_unit(&dir, "pay");
    conductor(&dir)
        .args(["memory", "compact", "pay"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to compress"));
    conductor(&dir)
        .args(["memory", "query", "pay", "anything"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No matches."));
}

// ---------------------------------------------------------------------------
// conductor prompt / config
// ---------------------------------------------------------------------------

#[test]
fn prompt_show_applies_override_last() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let overrides = dir.path().join(".conductor/prompts/overrides");
    std::fs::create_dir_all(&overrides).unwrap();
    std::fs::write(overrides.join("analyst.md"), "House rules.").unwrap();

    let out = conductor(&dir)
        .args(["--json", "prompt", "show", "analyst"])
        .output()
        .unwrap();
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let body = v["body"].as_str().unwrap();
    assert!(body.starts_with("You are one role"));
    assert!(body.ends_with("House rules."));
}

#[test]
fn config_validate_reports_undefined_role() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    conductor(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));

    let path = dir.path().join(".conductor/config.yaml");
    let cfg = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, cfg.replacen("- analyst", "- ghost", 1)).unwrap();
    conductor(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("undefined role 'ghost'"));
}
