//! Project initialization.
//!
//! `stagehand init` creates the `.stagehand/` directory in a project:
//!
//! ```text
//! .stagehand/
//! ├── phases.json      # Phase plan (default course-production sequence)
//! ├── stagehand.toml   # Retry bound, timeouts, worker bindings
//! ├── state.json       # Workflow state of the current run (created on first run)
//! ├── audit/
//! │   ├── audit.jsonl  # Audit log of the current run
//! │   └── runs/        # Archived logs of earlier runs
//! ├── deliverables/    # Deliverable registry
//! └── logs/            # Operational logs and worker transcripts
//! ```

use crate::phase::{PhasesFile, default_phases};
use crate::stagehand_config::{CONFIG_FILE_NAME, default_config_template};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// The name of the stagehand configuration directory.
pub const STAGEHAND_DIR: &str = ".stagehand";

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .stagehand directory
    pub stagehand_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
    /// Files written by this call; existing files are never overwritten
    pub written: Vec<PathBuf>,
}

/// Initialize a project in the given directory.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let stagehand_dir = project_dir.join(STAGEHAND_DIR);
    let created = !stagehand_dir.exists();

    for sub in ["audit/runs", "deliverables", "logs"] {
        let path = stagehand_dir.join(sub);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }

    let mut written = Vec::new();

    let phases_file = stagehand_dir.join("phases.json");
    if !phases_file.exists() {
        PhasesFile {
            created_at: chrono::Utc::now().to_rfc3339(),
            phases: default_phases(),
        }
        .save(&phases_file)?;
        written.push(phases_file);
    }

    let config_file = stagehand_dir.join(CONFIG_FILE_NAME);
    if !config_file.exists() {
        std::fs::write(&config_file, default_config_template())
            .with_context(|| format!("Failed to create {}", config_file.display()))?;
        written.push(config_file);
    }

    Ok(InitResult {
        stagehand_dir,
        created,
        written,
    })
}

/// Check if a project is already initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(STAGEHAND_DIR).join("phases.json").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::load_plan;
    use crate::stagehand_config::StagehandToml;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_structure() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert_eq!(result.stagehand_dir, dir.path().join(".stagehand"));
        for sub in ["audit", "audit/runs", "deliverables", "logs"] {
            assert!(
                result.stagehand_dir.join(sub).is_dir(),
                "{} should be a directory",
                sub
            );
        }
        assert_eq!(result.written.len(), 2);
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_init_writes_valid_default_plan_and_config() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        let plan = load_plan(&result.stagehand_dir.join("phases.json")).unwrap();
        assert_eq!(plan.len(), 6);
        assert!(plan.pair().is_some());

        let toml = StagehandToml::load(&result.stagehand_dir.join(CONFIG_FILE_NAME)).unwrap();
        assert!(toml.workers.contains_key("default"));
    }

    #[test]
    fn test_init_is_idempotent_and_keeps_edits() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let config = dir.path().join(".stagehand").join(CONFIG_FILE_NAME);
        std::fs::write(&config, "[defaults]\nmax_retries = 1\n").unwrap();

        let second = init_project(dir.path()).unwrap();
        assert!(!second.created);
        assert!(second.written.is_empty());
        assert_eq!(
            std::fs::read_to_string(&config).unwrap(),
            "[defaults]\nmax_retries = 1\n"
        );
    }

    #[test]
    fn test_not_initialized_without_phases() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
    }
}
