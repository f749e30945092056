//! Phase execution: `stagehand run` and `stagehand advance`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use super::super::Cli;
use stagehand::audit::AuditLog;
use stagehand::config::Config;
use stagehand::deliverable::{DeliverableStore, FsDeliverableStore};
use stagehand::dispatch::Dispatcher;
use stagehand::errors::OrchestratorError;
use stagehand::handoff::HandoffPackage;
use stagehand::orchestrator::{AdvanceOutcome, PhaseMachine, PhaseStatus, StateStore};
use stagehand::phase::load_plan;
use stagehand::rework::ReworkController;
use stagehand::ui::{RunUI, icons};

pub fn check_run_prerequisites(config: &Config) -> Result<()> {
    if !config.is_initialized() {
        anyhow::bail!("Project not initialized. Run 'stagehand init' first.");
    }
    Ok(())
}

/// Assemble the full stack for a project: plan, worker registry, deliverable
/// registry, audit log, rework controller and the persisted workflow state.
pub fn open_machine(config: &Config) -> Result<PhaseMachine> {
    let plan = load_plan(&config.phases_file)?;
    let settings = config.settings();
    for warning in settings.toml.validate(&plan) {
        tracing::warn!("{}", warning);
    }

    let store: Arc<dyn DeliverableStore> =
        Arc::new(FsDeliverableStore::new(&config.deliverables_dir));
    let dispatcher = Arc::new(Dispatcher::new(
        settings.build_registry(&config.log_dir),
        store,
        settings.worker_timeout(),
    ));
    let audit = Arc::new(
        AuditLog::open(&config.audit_file)
            .with_context(|| format!("Failed to open audit log {}", config.audit_file.display()))?,
    );
    let controller = ReworkController::new(dispatcher, audit.clone(), settings.max_retries());

    let state_store = StateStore::new(config.state_file.clone());
    let machine = match state_store.load()? {
        Some(state) => {
            tracing::debug!(run_id = %state.run_id, "continuing persisted run");
            PhaseMachine::with_state(plan, state, controller, audit)?
        }
        None => PhaseMachine::new(plan, controller, audit),
    };
    Ok(machine.persist_to(state_store))
}

fn attach_ui(machine: PhaseMachine, verbose: bool) -> (PhaseMachine, Arc<RunUI>) {
    let total = machine.plan().len() as u64;
    let completed = machine
        .plan()
        .phases()
        .iter()
        .filter(|p| machine.state().status(&p.id) == Some(PhaseStatus::Complete))
        .count() as u64;
    let ui = Arc::new(RunUI::new(total, completed, verbose));
    (machine.with_ui(ui.clone()), ui)
}

fn report_handoff(config: &Config, package: &HandoffPackage) -> Result<()> {
    package.save(&config.handoff_file)?;
    println!();
    println!(
        "{} Run {} complete: {} phases, {} deliverables, {} retries",
        icons::SPARKLE,
        package.run_id,
        package.phases.len(),
        package.deliverable_count(),
        package.total_retries
    );
    println!("Handoff package written to {}", config.handoff_file.display());
    Ok(())
}

fn report_failure(err: &OrchestratorError) {
    if let OrchestratorError::RetryLimitExceeded { phase, .. } = err {
        eprintln!();
        eprintln!(
            "{} {}",
            icons::BLOCKER,
            console::style(format!("Phase {} is BLOCKED", phase)).red().bold()
        );
        eprintln!(
            "Fix the deficiencies, then run 'stagehand resume {}' to retry it.",
            phase
        );
    }
}

/// Execute phases until the run completes or blocks.
pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, max_retries: Option<u32>) -> Result<()> {
    let config = Config::new(project_dir, cli.verbose, max_retries)?;
    check_run_prerequisites(&config)?;
    config.ensure_directories()?;
    let _lock = stagehand::lock::RunLock::acquire(&config.lock_file)?;

    let (mut machine, ui) = attach_ui(open_machine(&config)?, cli.verbose);
    let result = machine.run().await;
    ui.finish();

    match result {
        Ok(package) => report_handoff(&config, &package),
        Err(err) => {
            report_failure(&err);
            Err(err.into())
        }
    }
}

/// Execute only the current phase (both loops for the parallel pair).
pub async fn cmd_advance(cli: &Cli, project_dir: PathBuf, max_retries: Option<u32>) -> Result<()> {
    let config = Config::new(project_dir, cli.verbose, max_retries)?;
    check_run_prerequisites(&config)?;
    config.ensure_directories()?;
    let _lock = stagehand::lock::RunLock::acquire(&config.lock_file)?;

    let (mut machine, ui) = attach_ui(open_machine(&config)?, cli.verbose);
    let result = machine.advance().await;
    ui.finish();

    match result {
        Ok(AdvanceOutcome::Advanced { completed }) => {
            println!(
                "{} Completed phase(s) {}",
                icons::CHECK,
                completed.join(", ")
            );
            if let Some(next) = machine.current_phase() {
                println!("Next phase: {} {}", next.id, next.name);
            }
            Ok(())
        }
        Ok(AdvanceOutcome::RunComplete(package)) => report_handoff(&config, &package),
        Ok(AdvanceOutcome::AlreadyComplete) => {
            println!("All phases are complete. Run 'stagehand handoff' to view the package.");
            Ok(())
        }
        Err(err) => {
            report_failure(&err);
            Err(err.into())
        }
    }
}
