//! Worker bindings.
//!
//! Which worker handles a phase is decided by a dispatch table keyed by
//! phase id. Each entry is a `WorkerBinding` variant; phases without an
//! entry fall back to the default binding, if any.

use super::{CommandWorker, Task, Worker, WorkerOutput};
use crate::errors::WorkerError;
use crate::phase::Phase;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// The closed set of worker kinds.
#[derive(Clone)]
pub enum WorkerBinding {
    /// External process speaking JSON over stdin/stdout
    Command(CommandWorker),
    /// Replays a manifest file written ahead of time
    ManifestFile(ManifestFileWorker),
    /// Worker implemented in-process
    InProcess(Arc<dyn Worker>),
}

impl WorkerBinding {
    pub fn command(
        program: &str,
        args: &[String],
        working_dir: PathBuf,
        timeout: Option<Duration>,
    ) -> Self {
        WorkerBinding::Command(CommandWorker::new(program, args, working_dir, timeout))
    }

    pub fn manifest_file(template: &str, base_dir: &Path) -> Self {
        WorkerBinding::ManifestFile(ManifestFileWorker::new(template, base_dir))
    }

    /// Per-binding timeout override.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            WorkerBinding::Command(w) => w.timeout(),
            WorkerBinding::ManifestFile(_) | WorkerBinding::InProcess(_) => None,
        }
    }
}

#[async_trait]
impl Worker for WorkerBinding {
    fn identity(&self) -> String {
        match self {
            WorkerBinding::Command(w) => w.identity(),
            WorkerBinding::ManifestFile(w) => w.identity(),
            WorkerBinding::InProcess(w) => w.identity(),
        }
    }

    async fn invoke(&self, phase: &Phase, task: &Task) -> Result<WorkerOutput, WorkerError> {
        match self {
            WorkerBinding::Command(w) => w.invoke(phase, task).await,
            WorkerBinding::ManifestFile(w) => w.invoke(phase, task).await,
            WorkerBinding::InProcess(w) => w.invoke(phase, task).await,
        }
    }
}

/// Phase id → worker dispatch table.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    bindings: HashMap<String, WorkerBinding>,
    fallback: Option<WorkerBinding>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, phase_id: &str, binding: WorkerBinding) -> Self {
        self.bindings.insert(phase_id.to_string(), binding);
        self
    }

    pub fn with_fallback(mut self, binding: WorkerBinding) -> Self {
        self.fallback = Some(binding);
        self
    }

    pub fn resolve(&self, phase_id: &str) -> Option<&WorkerBinding> {
        self.bindings.get(phase_id).or(self.fallback.as_ref())
    }

    pub fn is_bound(&self, phase_id: &str) -> bool {
        self.resolve(phase_id).is_some()
    }
}

/// Reads a worker output file from disk.
///
/// The path template may contain `{phase}` and `{attempt}` placeholders.
#[derive(Debug, Clone)]
pub struct ManifestFileWorker {
    template: String,
    base_dir: PathBuf,
}

impl ManifestFileWorker {
    pub fn new(template: &str, base_dir: &Path) -> Self {
        Self {
            template: template.to_string(),
            base_dir: base_dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, phase: &Phase, task: &Task) -> PathBuf {
        let relative = self
            .template
            .replace("{phase}", &phase.id)
            .replace("{attempt}", &task.attempt.to_string());
        self.base_dir.join(relative)
    }
}

#[async_trait]
impl Worker for ManifestFileWorker {
    fn identity(&self) -> String {
        format!("manifest:{}", self.template)
    }

    async fn invoke(&self, phase: &Phase, task: &Task) -> Result<WorkerOutput, WorkerError> {
        let path = self.path_for(phase, task);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            WorkerError::Other(format!("cannot read {}: {}", path.display(), e))
        })?;
        super::command::parse_worker_output(&content)
    }
}
