//! Configuration view and validation commands: `stagehand config`.

use anyhow::Result;

use super::super::ConfigCommands;
use stagehand::stagehand_config::{CONFIG_FILE_NAME, StagehandConfig, StagehandToml, WorkerConfig};

fn print_workers(toml: &StagehandToml) {
    if toml.workers.is_empty() {
        println!("  (no workers bound)");
        return;
    }
    for (key, worker) in &toml.workers {
        match worker {
            WorkerConfig::Command {
                program,
                args,
                timeout_secs,
            } => {
                let timeout = timeout_secs
                    .map(|t| format!(" (timeout {}s)", t))
                    .unwrap_or_default();
                println!("  {:<10} command: {} {}{}", key, program, args.join(" "), timeout);
            }
            WorkerConfig::Manifest { path } => {
                println!("  {:<10} manifest: {}", key, path);
            }
        }
    }
}

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let settings = StagehandConfig::new(project_dir.to_path_buf())?;
    let config_path = settings.stagehand_dir.join(CONFIG_FILE_NAME);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Stagehand Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found; using defaults.", CONFIG_FILE_NAME);
            }
            println!();

            if let Some(name) = &settings.toml.project.name {
                println!("[project]");
                println!("  name = \"{}\"", name);
                println!();
            }

            println!("[defaults]");
            println!("  max_retries = {}", settings.toml.defaults.max_retries);
            println!(
                "  worker_timeout_secs = {}",
                settings.toml.defaults.worker_timeout_secs
            );
            println!();
            println!("[workers]");
            print_workers(&settings.toml);
            println!();

            println!("Effective values (with env overrides):");
            println!("  max_retries = {}", settings.max_retries());
            println!(
                "  worker_timeout_secs = {}",
                settings.worker_timeout().as_secs()
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let phases_file = settings.stagehand_dir.join("phases.json");
            if !phases_file.exists() {
                anyhow::bail!("No phases.json found. Run 'stagehand init' first.");
            }
            let plan = stagehand::phase::load_plan(&phases_file)?;
            println!("Phase plan: {} phases, valid.", plan.len());

            let warnings = settings.toml.validate(&plan);
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
