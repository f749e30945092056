use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::stagehand_config::{CONFIG_FILE_NAME, StagehandConfig};

/// Runtime configuration: every path under `.stagehand/` plus the resolved
/// project settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub stagehand_dir: PathBuf,
    pub phases_file: PathBuf,
    pub config_file: PathBuf,
    pub state_file: PathBuf,
    pub audit_dir: PathBuf,
    pub audit_file: PathBuf,
    pub runs_dir: PathBuf,
    pub deliverables_dir: PathBuf,
    pub log_dir: PathBuf,
    pub handoff_file: PathBuf,
    pub lock_file: PathBuf,
    pub verbose: bool,
    settings: StagehandConfig,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, max_retries: Option<u32>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let settings = StagehandConfig::with_cli_args(project_dir.clone(), max_retries)?;

        let stagehand_dir = project_dir.join(".stagehand");
        let audit_dir = stagehand_dir.join("audit");

        Ok(Self {
            phases_file: stagehand_dir.join("phases.json"),
            config_file: stagehand_dir.join(CONFIG_FILE_NAME),
            state_file: stagehand_dir.join("state.json"),
            audit_file: audit_dir.join("audit.jsonl"),
            runs_dir: audit_dir.join("runs"),
            audit_dir,
            deliverables_dir: stagehand_dir.join("deliverables"),
            log_dir: stagehand_dir.join("logs"),
            handoff_file: stagehand_dir.join("handoff.json"),
            lock_file: stagehand_dir.join("run.lock"),
            stagehand_dir,
            project_dir,
            verbose,
            settings,
        })
    }

    /// Resolved stagehand.toml settings with env and CLI overrides.
    pub fn settings(&self) -> &StagehandConfig {
        &self.settings
    }

    pub fn is_initialized(&self) -> bool {
        self.phases_file.exists()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.audit_dir).context("Failed to create audit directory")?;
        std::fs::create_dir_all(&self.runs_dir).context("Failed to create runs directory")?;
        std::fs::create_dir_all(&self.deliverables_dir)
            .context("Failed to create deliverables directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }
}
