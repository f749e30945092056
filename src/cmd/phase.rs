//! Phase listing, status, checkpoint, resume and reset commands.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::Cli;
use stagehand::config::Config;
use stagehand::errors::format_deficiencies;
use stagehand::orchestrator::{self, PhaseStatus, StateStore, WorkflowState};
use stagehand::phase::{PhasesFile, load_plan};
use stagehand::ui::icons;

fn styled_status(status: PhaseStatus) -> console::StyledObject<String> {
    let label = style(status.to_string());
    match status {
        PhaseStatus::Complete => label.green(),
        PhaseStatus::InProgress => label.yellow(),
        PhaseStatus::Blocked => label.red().bold(),
        PhaseStatus::NotStarted => label.dim(),
    }
}

pub fn cmd_list(project_dir: &Path) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false, None)?;
    if !config.is_initialized() {
        println!();
        println!("No phases found. Run 'stagehand init' first to initialize the project.");
        println!();
        return Ok(());
    }

    let pf = PhasesFile::load(&config.phases_file)?;
    let plan = pf.clone().into_plan()?;

    println!();
    println!("Phases loaded from: {}", config.phases_file.display());
    println!("Created at: {}", pf.created_at);
    println!();
    println!("{:<6} {:<28} Completion criteria", "Phase", "Name");
    println!(
        "{:<6} {:<28} -------------------",
        "------", "----------------------------"
    );

    for phase in plan.phases() {
        let criteria: Vec<&str> = phase.criteria.iter().map(String::as_str).collect();
        println!("{:<6} {:<28} {}", phase.id, phase.name, criteria.join(", "));
        if let Some(partner) = &phase.parallel_with {
            let threshold: Vec<&str> = phase.partial_threshold.iter().map(String::as_str).collect();
            println!(
                "       {} runs alongside {} once [{}] complete",
                icons::PARALLEL,
                partner,
                threshold.join(", ")
            );
        }
    }
    println!();
    Ok(())
}

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false, None)?;

    println!();
    println!("Stagehand Project Status");
    println!("========================");
    println!();

    if !config.is_initialized() {
        println!("Project: Not initialized");
        println!();
        println!("Run 'stagehand init' to initialize the project.");
        println!();
        return Ok(());
    }

    let plan = load_plan(&config.phases_file)?;
    let persisted = StateStore::new(config.state_file.clone()).load()?;
    let started = persisted.is_some();
    let state = persisted.unwrap_or_else(|| WorkflowState::new(&plan));
    let max_retries = state
        .max_retries
        .unwrap_or_else(|| config.settings().max_retries());

    if started {
        println!("Run:     {}", state.run_id);
        println!(
            "Started: {}",
            state.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(done) = state.completed_at {
            println!("Done:    {}", done.format("%Y-%m-%d %H:%M:%S"));
        }
    } else {
        println!("Execution: Not started");
    }
    println!();
    println!(
        "{:<6} {:<28} {:<12} Retries",
        "Phase", "Name", "Status"
    );
    for phase in plan.phases() {
        let Some(record) = state.record(&phase.id) else {
            continue;
        };
        println!(
            "{:<6} {:<28} {:<12} {}/{}",
            phase.id,
            phase.name,
            styled_status(record.status),
            record.retries,
            max_retries
        );
        if record.status == PhaseStatus::Blocked {
            let note = if record.halted {
                "halted with its parallel partner".to_string()
            } else {
                format!("deficiencies: {}", format_deficiencies(&record.deficiencies))
            };
            println!("       {} {}", icons::BLOCKER, note);
        }
    }
    println!();

    if let Some(record) = state.blocked().into_iter().find(|r| !r.halted) {
        println!(
            "Run halted: phase {} BLOCKED after {}/{} retries.",
            record.phase, record.retries, max_retries
        );
        println!("Run 'stagehand resume {}' once it is fixed.", record.phase);
        println!();
    } else if state.is_complete() {
        println!("All phases complete. Run 'stagehand handoff' to view the package.");
        println!();
    } else if !started {
        println!("Run 'stagehand run' to start execution.");
        println!();
    }
    Ok(())
}

/// Evaluate the current phase's latest manifest. Writes nothing.
pub fn cmd_checkpoint(project_dir: &Path) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false, None)?;
    if !config.is_initialized() {
        anyhow::bail!("Project not initialized. Run 'stagehand init' first.");
    }

    let plan = load_plan(&config.phases_file)?;
    let state = StateStore::new(config.state_file.clone())
        .load()?
        .unwrap_or_else(|| WorkflowState::new(&plan));

    let Some(checkpoint) = orchestrator::checkpoint(&plan, &state) else {
        println!("All phases are complete; nothing to check.");
        return Ok(());
    };

    println!();
    println!(
        "Checkpoint for phase {} ({}): {} deliverable(s) evaluated",
        checkpoint.phase, checkpoint.status, checkpoint.evaluated
    );
    if checkpoint.verdict.is_pass() {
        println!("{} {}", icons::CHECK, style("PASS").green().bold());
    } else {
        println!("{} {}", icons::CROSS, style("FAIL").red().bold());
        for deficiency in checkpoint.verdict.deficiencies() {
            println!("  - {}", deficiency);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_resume(project_dir: &Path, cli: &Cli, phase: &str) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, None)?;
    super::run::check_run_prerequisites(&config)?;
    let _lock = stagehand::lock::RunLock::acquire(&config.lock_file)?;

    let mut machine = super::run::open_machine(&config)?;
    let resumed = machine.resume(phase)?;

    println!(
        "{} Resumed phase(s) {}: retries reset to 0/{}",
        icons::RETRY,
        resumed.join(", "),
        machine.max_retries()
    );
    println!("Run 'stagehand run' to continue.");
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, cli: &Cli, force: bool) -> Result<()> {
    use dialoguer::Confirm;
    use stagehand::audit::logger::archive;

    let config = Config::new(project_dir.to_path_buf(), cli.verbose, None)?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will start a new run and archive the current audit log. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let _lock = stagehand::lock::RunLock::acquire(&config.lock_file)?;
    let store = StateStore::new(config.state_file.clone());
    let run_id = store
        .load()
        .ok()
        .flatten()
        .map(|s| s.run_id.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if let Some(archived) = archive(&config.audit_file, &config.runs_dir, &run_id)? {
        println!("Archived audit log to {}", archived.display());
    }
    store.reset()?;

    if config.handoff_file.exists() {
        std::fs::remove_file(&config.handoff_file).ok();
    }
    if config.deliverables_dir.exists() {
        std::fs::remove_dir_all(&config.deliverables_dir).ok();
    }
    config.ensure_directories()?;

    println!("Reset complete");
    Ok(())
}
