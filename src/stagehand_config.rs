//! Project configuration, read from `.stagehand/stagehand.toml`.
//!
//! Layered: built-in defaults, then the file, then environment variables,
//! then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "intro-to-rust"
//!
//! [defaults]
//! max_retries = 3
//! worker_timeout_secs = 600
//!
//! # Fallback for phases without their own binding
//! [workers.default]
//! kind = "command"
//! program = "course-writer"
//! args = ["--format", "json"]
//!
//! [workers.04]
//! kind = "command"
//! program = "quiz-builder"
//! timeout_secs = 120
//!
//! [workers.06]
//! kind = "manifest"
//! path = "recorded/{phase}-{attempt}.json"
//! ```

use crate::dispatch::{CommandWorker, DEFAULT_WORKER_TIMEOUT_SECS, WorkerBinding, WorkerRegistry};
use crate::phase::PhasePlan;
use crate::rework::DEFAULT_MAX_RETRIES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Key of the fallback binding under `[workers]`.
pub const DEFAULT_WORKER_KEY: &str = "default";

pub const CONFIG_FILE_NAME: &str = "stagehand.toml";

/// Worker binding as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkerConfig {
    /// External program; task JSON on stdin, manifest JSON on stdout
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    /// Pre-recorded manifest file, relative to the project directory
    Manifest { path: String },
}

/// Project-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (optional, defaults to directory name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Default settings for all phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Rework attempts allowed after the first failed gate
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds a worker may run before the attempt counts as failed
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_worker_timeout_secs() -> u64 {
    DEFAULT_WORKER_TIMEOUT_SECS
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            worker_timeout_secs: default_worker_timeout_secs(),
        }
    }
}

/// The complete stagehand.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagehandToml {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Phase id (or `default`) -> worker binding
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerConfig>,
}

impl StagehandToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stagehand.toml")
    }

    /// Load from `<dir>/stagehand.toml`, or defaults if the file is absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize stagehand.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Warnings about bindings that do not line up with `plan`.
    pub fn validate(&self, plan: &PhasePlan) -> Vec<String> {
        let mut warnings = Vec::new();

        for key in self.workers.keys() {
            if key != DEFAULT_WORKER_KEY && plan.get(key).is_none() {
                warnings.push(format!("Worker bound to unknown phase '{}'", key));
            }
        }

        if !self.workers.contains_key(DEFAULT_WORKER_KEY) {
            for phase in plan.phases() {
                if !self.workers.contains_key(&phase.id) {
                    warnings.push(format!(
                        "Phase {} has no worker binding and there is no [workers.default]",
                        phase.id
                    ));
                }
            }
        }

        if self.defaults.worker_timeout_secs == 0 {
            warnings.push("worker_timeout_secs is 0; every dispatch will time out".to_string());
        }

        warnings
    }
}

/// Resolved configuration for one project: the parsed file plus
/// environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct StagehandConfig {
    pub project_dir: PathBuf,
    pub stagehand_dir: PathBuf,
    pub toml: StagehandToml,
    /// CLI override for max_retries
    pub cli_max_retries: Option<u32>,
}

impl StagehandConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let stagehand_dir = project_dir.join(".stagehand");
        let toml = StagehandToml::load_or_default(&stagehand_dir)?;
        Ok(Self {
            project_dir,
            stagehand_dir,
            toml,
            cli_max_retries: None,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, max_retries: Option<u32>) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli_max_retries = max_retries;
        Ok(config)
    }

    /// max_retries (CLI → env → file → default).
    pub fn max_retries(&self) -> u32 {
        self.cli_max_retries
            .or_else(|| env_override("STAGEHAND_MAX_RETRIES"))
            .unwrap_or(self.toml.defaults.max_retries)
    }

    /// Default worker timeout (env → file → default).
    pub fn worker_timeout(&self) -> Duration {
        let secs = env_override("STAGEHAND_WORKER_TIMEOUT_SECS")
            .unwrap_or(self.toml.defaults.worker_timeout_secs);
        Duration::from_secs(secs)
    }

    /// Build the phase → worker dispatch table. Command workers run in the
    /// project directory and keep transcripts under `transcript_dir`.
    pub fn build_registry(&self, transcript_dir: &Path) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        for (key, worker) in &self.toml.workers {
            let binding = match worker {
                WorkerConfig::Command {
                    program,
                    args,
                    timeout_secs,
                } => WorkerBinding::Command(
                    CommandWorker::new(
                        program,
                        args,
                        self.project_dir.clone(),
                        timeout_secs.map(Duration::from_secs),
                    )
                    .with_transcripts(transcript_dir.to_path_buf()),
                ),
                WorkerConfig::Manifest { path } => {
                    WorkerBinding::manifest_file(path, &self.project_dir)
                }
            };
            registry = if key == DEFAULT_WORKER_KEY {
                registry.with_fallback(binding)
            } else {
                registry.bind(key, binding)
            };
        }
        registry
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

/// Starter config written by `init`.
pub fn default_config_template() -> &'static str {
    r#"# stagehand configuration

[defaults]
max_retries = 3
worker_timeout_secs = 600

# Worker used for every phase without its own [workers.<phase-id>] entry.
# A command worker reads the task as JSON on stdin and prints
# {"deliverables": [{"type": "...", "id": "...", "status": "complete"}], "summary": "..."}
[workers.default]
kind = "command"
program = "stagehand-worker"
args = []
"#
}
