//! Worker dispatch.
//!
//! The dispatcher resolves the worker bound to a phase, invokes it with a
//! task under a timeout, and checks that the returned manifest is
//! structurally well-formed. It never judges completeness; a manifest that
//! lacks required types is accepted here and rejected by the quality gate.
//!
//! ## Usage
//!
//! ```no_run
//! use stagehand::deliverable::MemoryDeliverableStore;
//! use stagehand::dispatch::{Dispatcher, Task, WorkerBinding, WorkerRegistry};
//! use stagehand::phase::default_plan;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = WorkerRegistry::new().with_fallback(WorkerBinding::command(
//!     "course-writer",
//!     &[],
//!     std::env::current_dir()?,
//!     None,
//! ));
//! let dispatcher = Dispatcher::new(
//!     registry,
//!     Arc::new(MemoryDeliverableStore::new()),
//!     Duration::from_secs(600),
//! );
//!
//! let plan = default_plan();
//! let phase = &plan.phases()[0];
//! let outcome = dispatcher.dispatch(phase, &Task::new(phase, Vec::new())).await?;
//! println!("{} deliverables: {}", outcome.manifest.len(), outcome.summary);
//! # Ok(())
//! # }
//! ```

use crate::deliverable::{Deliverable, DeliverableStore, Manifest};
use crate::errors::{StoreError, WorkerError};
use crate::gates::Deficiency;
use crate::phase::Phase;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub mod command;
pub mod worker;

pub use command::CommandWorker;
pub use worker::{ManifestFileWorker, WorkerBinding, WorkerRegistry};

/// Default worker timeout.
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 600;

/// Work handed to a worker for one attempt at a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub phase_id: String,
    pub description: String,
    /// Deliverables inherited from predecessor phase(s), in sequence order
    #[serde(default)]
    pub inputs: Vec<Deliverable>,
    /// Gate deficiencies of the previous attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deficiencies: Vec<Deficiency>,
    /// Dispatch failure of the previous attempt (timeout, worker error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_failure: Option<String>,
    /// 1-based attempt number
    pub attempt: u32,
}

impl Task {
    /// First-attempt task for a phase.
    pub fn new(phase: &Phase, inputs: Vec<Deliverable>) -> Self {
        Self {
            phase_id: phase.id.clone(),
            description: phase.task_description(),
            inputs,
            deficiencies: Vec::new(),
            previous_failure: None,
            attempt: 1,
        }
    }

    /// Task for the next attempt, carrying the feedback of this one.
    pub fn rework(&self, deficiencies: Vec<Deficiency>, failure: Option<String>) -> Self {
        Self {
            phase_id: self.phase_id.clone(),
            description: self.description.clone(),
            inputs: self.inputs.clone(),
            deficiencies,
            previous_failure: failure,
            attempt: self.attempt + 1,
        }
    }

    /// One-line summary for the audit log.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} [attempt {}, {} input(s)]",
            self.description,
            self.attempt,
            self.inputs.len()
        );
        if !self.deficiencies.is_empty() {
            summary.push_str(&format!(
                "; rework: {}",
                crate::errors::format_deficiencies(&self.deficiencies)
            ));
        }
        if let Some(failure) = &self.previous_failure {
            summary.push_str(&format!("; previous failure: {failure}"));
        }
        summary
    }
}

/// What a worker hands back: its manifest and a short output summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub deliverables: Vec<Deliverable>,
    #[serde(default)]
    pub summary: String,
}

/// An external collaborator that executes a phase's task.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Identity recorded in the audit log.
    fn identity(&self) -> String;

    async fn invoke(&self, phase: &Phase, task: &Task) -> Result<WorkerOutput, WorkerError>;
}

/// A structurally valid manifest returned by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub manifest: Manifest,
    pub summary: String,
    pub worker: String,
}

/// Resolves workers per phase and invokes them under a timeout.
pub struct Dispatcher {
    registry: WorkerRegistry,
    store: Arc<dyn DeliverableStore>,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: WorkerRegistry,
        store: Arc<dyn DeliverableStore>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            default_timeout,
        }
    }

    /// Identity of the worker bound to `phase_id`, for logging.
    pub fn worker_identity(&self, phase_id: &str) -> String {
        self.registry
            .resolve(phase_id)
            .map(|w| w.identity())
            .unwrap_or_else(|| "unbound".to_string())
    }

    /// Invoke the phase's worker once.
    pub async fn dispatch(&self, phase: &Phase, task: &Task) -> Result<DispatchOutcome, WorkerError> {
        let worker = self
            .registry
            .resolve(&phase.id)
            .ok_or_else(|| WorkerError::Unbound {
                phase: phase.id.clone(),
            })?;
        let timeout = worker.timeout().unwrap_or(self.default_timeout);

        tracing::debug!(
            phase = %phase.id,
            attempt = task.attempt,
            worker = %worker.identity(),
            timeout_secs = timeout.as_secs_f64(),
            "dispatching task"
        );

        let output = match tokio::time::timeout(timeout, worker.invoke(phase, task)).await {
            Ok(result) => result?,
            Err(_) => return Err(WorkerError::Timeout { after: timeout }),
        };

        validate_manifest(&output.deliverables)?;

        for deliverable in &output.deliverables {
            self.store
                .record(&phase.id, task.attempt, deliverable)
                .map_err(|e| match e {
                    StoreError::Conflict { id } => WorkerError::Malformed(format!(
                        "deliverable {id} was already recorded with different metadata"
                    )),
                    other => WorkerError::Other(other.to_string()),
                })?;
        }

        Ok(DispatchOutcome {
            manifest: Manifest::new(output.deliverables),
            summary: output.summary,
            worker: worker.identity(),
        })
    }
}

/// Every entry needs a type and an identifier, and identifiers are unique
/// within one manifest.
pub fn validate_manifest(deliverables: &[Deliverable]) -> Result<(), WorkerError> {
    let mut ids = HashSet::new();
    for (i, d) in deliverables.iter().enumerate() {
        if d.kind.trim().is_empty() {
            return Err(WorkerError::Malformed(format!("entry {i} has no type")));
        }
        if d.id.trim().is_empty() {
            return Err(WorkerError::Malformed(format!(
                "entry {i} ({}) has no identifier",
                d.kind
            )));
        }
        if !ids.insert(d.id.as_str()) {
            return Err(WorkerError::Malformed(format!(
                "identifier {} appears more than once",
                d.id
            )));
        }
    }
    Ok(())
}
