//! Integration tests for the stagehand CLI
//!
//! Workers are bound as manifest files so runs need no external process.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use stagehand::phase::default_phases;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a stagehand Command
fn stagehand() -> Command {
    cargo_bin_cmd!("stagehand")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a stagehand project in a temp directory
fn init_project(dir: &TempDir) {
    stagehand()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

/// Bind every phase to `outputs/<phase>.json` and write a complete manifest
/// for each phase, except those listed in `incomplete`, which deliver nothing.
fn bind_manifest_workers(dir: &Path, incomplete: &[&str]) {
    fs::write(
        dir.join(".stagehand/stagehand.toml"),
        r#"
[defaults]
max_retries = 1
worker_timeout_secs = 30

[workers.default]
kind = "manifest"
path = "outputs/{phase}.json"
"#,
    )
    .unwrap();

    let outputs = dir.join("outputs");
    fs::create_dir_all(&outputs).unwrap();
    for phase in default_phases() {
        let deliverables: Vec<serde_json::Value> = if incomplete.contains(&phase.id.as_str()) {
            Vec::new()
        } else {
            phase
                .criteria
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "type": c,
                        "id": format!("{}-{}", phase.id, c),
                        "status": "complete"
                    })
                })
                .collect()
        };
        let output = serde_json::json!({
            "deliverables": deliverables,
            "summary": format!("{} done", phase.name)
        });
        fs::write(
            outputs.join(format!("{}.json", phase.id)),
            serde_json::to_string_pretty(&output).unwrap(),
        )
        .unwrap();
    }
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_stagehand_help() {
        stagehand().arg("--help").assert().success();
    }

    #[test]
    fn test_stagehand_version() {
        stagehand().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        stagehand()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized stagehand project"));

        let root = dir.path().join(".stagehand");
        assert!(root.join("phases.json").exists());
        assert!(root.join("stagehand.toml").exists());
        assert!(root.join("audit/runs").is_dir());
        assert!(root.join("deliverables").is_dir());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        stagehand()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_status_uninitialized() {
        let dir = create_temp_project();

        stagehand()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not initialized"));
    }

    #[test]
    fn test_status_before_first_run() {
        let dir = create_temp_project();
        init_project(&dir);

        stagehand()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not started"))
            .stdout(predicate::str::contains("NOT_STARTED"))
            .stdout(predicate::str::contains("0/3"));
    }

    #[test]
    fn test_list_shows_plan_and_pair() {
        let dir = create_temp_project();
        init_project(&dir);

        stagehand()
            .current_dir(dir.path())
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("Course structure"))
            .stdout(predicate::str::contains("runs alongside 04"));
    }

    #[test]
    fn test_run_requires_init() {
        let dir = create_temp_project();

        stagehand()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("not initialized"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();

        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("init")
            .assert()
            .success();
        assert!(dir.path().join(".stagehand/phases.json").exists());
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        init_project(&dir);

        stagehand()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_retries = 3"))
            .stdout(predicate::str::contains("stagehand-worker"));
    }

    #[test]
    fn test_config_validate_warns_on_unknown_phase() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".stagehand/stagehand.toml"),
            r#"
[workers.default]
kind = "manifest"
path = "out.json"

[workers.42]
kind = "manifest"
path = "other.json"
"#,
        )
        .unwrap();

        stagehand()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("42"));
    }

    #[test]
    fn test_env_overrides_max_retries() {
        let dir = create_temp_project();
        init_project(&dir);

        stagehand()
            .current_dir(dir.path())
            .env("STAGEHAND_MAX_RETRIES", "7")
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("0/7"));
    }
}

// =============================================================================
// Run Tests
// =============================================================================

mod run_tests {
    use super::*;

    #[test]
    fn test_run_to_completion_writes_handoff() {
        let dir = create_temp_project();
        init_project(&dir);
        bind_manifest_workers(dir.path(), &[]);
        let phases = default_phases();
        let deliverables: usize = phases.iter().map(|p| p.criteria.len()).sum();

        stagehand()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains(format!(
                "complete: {} phases, {} deliverables",
                phases.len(),
                deliverables
            )));

        assert!(dir.path().join(".stagehand/handoff.json").exists());

        stagehand()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("COMPLETE"))
            .stdout(predicate::str::contains("All phases complete"));

        stagehand()
            .current_dir(dir.path())
            .arg("handoff")
            .assert()
            .success()
            .stdout(predicate::str::contains("01-structure"))
            .stdout(predicate::str::contains("06-handoff-checklist"));
    }

    #[test]
    fn test_audit_export_is_ordered_json() {
        let dir = create_temp_project();
        init_project(&dir);
        bind_manifest_workers(dir.path(), &[]);
        stagehand()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success();

        let export = dir.path().join("audit.json");
        stagehand()
            .current_dir(dir.path())
            .args(["audit", "export", "--output"])
            .arg(&export)
            .assert()
            .success();

        let entries: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(&export).unwrap()).unwrap();
        assert_eq!(entries.len(), 12);
        let seqs: Vec<u64> = entries.iter().map(|e| e["seq"].as_u64().unwrap()).collect();
        assert_eq!(seqs, (1..=12).collect::<Vec<u64>>());
        assert_eq!(entries[0]["kind"], "dispatch");
        assert_eq!(entries[1]["kind"], "gate");
        assert_eq!(entries[1]["status"], "pass");

        stagehand()
            .current_dir(dir.path())
            .args(["audit", "show", "02"])
            .assert()
            .success()
            .stdout(predicate::str::contains("phase 02 attempt 1"))
            .stdout(predicate::str::contains("manifest:outputs/{phase}.json"));
    }

    #[test]
    fn test_blocked_run_exits_with_code_two() {
        let dir = create_temp_project();
        init_project(&dir);
        bind_manifest_workers(dir.path(), &["02"]);

        stagehand()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Phase 02 BLOCKED after 1/1 retries"))
            .stderr(predicate::str::contains("missing: assessment-plan"));

        stagehand()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("BLOCKED"))
            .stdout(predicate::str::contains("missing: assessment-plan"))
            .stdout(predicate::str::contains("stagehand resume 02"));

        stagehand()
            .current_dir(dir.path())
            .arg("checkpoint")
            .assert()
            .success()
            .stdout(predicate::str::contains("FAIL"));

        // Still blocked on a second attempt, and nothing after 02 ran
        stagehand()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .code(2);
        stagehand()
            .current_dir(dir.path())
            .args(["audit", "show", "03"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No audit entries for phase 03"));
    }

    #[test]
    fn test_status_reports_retry_bound_of_the_run() {
        let dir = create_temp_project();
        init_project(&dir);
        bind_manifest_workers(dir.path(), &["02"]);

        stagehand()
            .current_dir(dir.path())
            .args(["run", "--max-retries", "2"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Phase 02 BLOCKED after 2/2 retries"));

        // stagehand.toml still says max_retries = 1
        stagehand()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("BLOCKED after 2/2 retries"))
            .stdout(predicate::str::contains("2/1").not());
    }

    #[test]
    fn test_resume_after_fixing_blocked_phase() {
        let dir = create_temp_project();
        init_project(&dir);
        bind_manifest_workers(dir.path(), &["02"]);
        stagehand()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .code(2);

        // Operator fixes the worker output, then resumes
        bind_manifest_workers(dir.path(), &[]);
        stagehand()
            .current_dir(dir.path())
            .args(["resume", "02"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Resumed phase(s) 02"));

        stagehand()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success();
    }

    #[test]
    fn test_advance_executes_one_phase() {
        let dir = create_temp_project();
        init_project(&dir);
        bind_manifest_workers(dir.path(), &[]);

        stagehand()
            .current_dir(dir.path())
            .arg("advance")
            .assert()
            .success()
            .stdout(predicate::str::contains("Completed phase(s) 01"))
            .stdout(predicate::str::contains("Next phase: 02"));

        stagehand()
            .current_dir(dir.path())
            .args(["audit", "show", "02"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No audit entries for phase 02"));
    }

    #[test]
    fn test_reset_archives_log_and_starts_new_run() {
        let dir = create_temp_project();
        init_project(&dir);
        bind_manifest_workers(dir.path(), &[]);
        stagehand()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success();

        stagehand()
            .current_dir(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Archived audit log"));

        let runs: Vec<_> = fs::read_dir(dir.path().join(".stagehand/audit/runs"))
            .unwrap()
            .collect();
        assert_eq!(runs.len(), 1);
        assert!(!dir.path().join(".stagehand/state.json").exists());
        assert!(!dir.path().join(".stagehand/handoff.json").exists());

        stagehand()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not started"));
    }

    #[test]
    fn test_handoff_before_completion_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        stagehand()
            .current_dir(dir.path())
            .arg("handoff")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("No handoff package yet"));
    }
}
