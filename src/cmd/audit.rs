//! Audit log inspection: `stagehand audit export` and `stagehand audit show`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::super::AuditCommands;
use stagehand::audit::{AuditLog, EntryKind, LogEntry};
use stagehand::config::Config;

fn print_entry(entry: &LogEntry) {
    let kind = match entry.kind {
        EntryKind::Dispatch => "dispatch",
        EntryKind::Gate => "gate",
    };
    let status = if entry.status.is_failure() {
        style(entry.status.to_string()).red()
    } else {
        style(entry.status.to_string()).green()
    };
    println!(
        "#{:<4} {} phase {} attempt {} {:<8} {}",
        entry.seq,
        entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        entry.phase,
        entry.attempt,
        kind,
        status
    );
    println!("      worker: {}", entry.worker);
    println!("      task:   {}", entry.task);
    println!("      output: {}", entry.output);
    println!("      next:   {}", entry.next_step);
}

pub fn cmd_audit(project_dir: &Path, command: &AuditCommands) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false, None)?;
    let entries = AuditLog::read(&config.audit_file)
        .with_context(|| format!("Failed to read {}", config.audit_file.display()))?;

    match command {
        AuditCommands::Export { output } => {
            let json = serde_json::to_string_pretty(&entries)
                .context("Failed to serialize audit log")?;
            match output {
                Some(path) => {
                    std::fs::write(path, &json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Exported {} entries to {}", entries.len(), path.display());
                }
                None => println!("{}", json),
            }
        }
        AuditCommands::Show { phase } => {
            let selected: Vec<&LogEntry> = entries.iter().filter(|e| &e.phase == phase).collect();
            println!();
            if selected.is_empty() {
                println!("No audit entries for phase {}", phase);
            } else {
                println!("Audit entries for phase {}:", phase);
                println!();
                for entry in selected {
                    print_entry(entry);
                }
            }
            println!();
        }
    }
    Ok(())
}
