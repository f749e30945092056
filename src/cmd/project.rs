//! Project initialization and handoff commands.

use anyhow::Result;
use std::path::Path;

use stagehand::config::Config;
use stagehand::handoff::HandoffPackage;
use stagehand::ui::icons;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use stagehand::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized stagehand project at {}",
            result.stagehand_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .stagehand/");
        println!("  ├── phases.json      # Phase plan (edit to change the sequence)");
        println!("  ├── stagehand.toml   # Retry bound, timeouts, worker bindings");
        println!("  ├── audit/runs/      # Audit log and archived runs");
        println!("  ├── deliverables/    # Deliverable registry");
        println!("  └── logs/            # Operational logs and worker transcripts");
        println!();
        println!("Next steps:");
        println!("  1. Bind workers to phases in stagehand.toml");
        println!("  2. Run `stagehand run` to start execution");
    } else if was_initialized {
        println!(
            "Stagehand project already initialized at {}",
            result.stagehand_dir.display()
        );
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed stagehand initialization at {}",
            result.stagehand_dir.display()
        );
    }

    Ok(())
}

pub fn cmd_handoff(project_dir: &Path, json: bool) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false, None)?;
    if !config.handoff_file.exists() {
        anyhow::bail!("No handoff package yet. The run must complete first ('stagehand run').");
    }
    let package = HandoffPackage::load(&config.handoff_file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&package)?);
        return Ok(());
    }

    println!();
    println!("{} Handoff package for run {}", icons::SPARKLE, package.run_id);
    println!(
        "Completed {} after {} retries and {} dispatches",
        package.completed_at.format("%Y-%m-%d %H:%M:%S"),
        package.total_retries,
        package.total_dispatches
    );
    println!();
    for phase in &package.phases {
        println!(
            "{} {} ({} retries, {} attempts, {:.1}s)",
            phase.phase, phase.name, phase.retries, phase.attempts, phase.elapsed_secs
        );
        for deliverable in phase.deliverables.iter() {
            println!("    {:<24} {}", deliverable.kind, deliverable.id);
        }
    }
    println!();
    Ok(())
}
