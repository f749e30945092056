//! Typed error hierarchy for the stagehand orchestrator.
//!
//! One enum per subsystem:
//! - `WorkerError`: a single worker invocation failed (recovered by rework)
//! - `StoreError`: the deliverable registry refused or failed a write
//! - `AuditError`: the audit log could not be written or read
//! - `PlanError`: the phase plan is not a valid sequence
//! - `StateError`: an illegal transition or a broken workflow invariant
//! - `OrchestratorError`: what the operator sees when a run stops

use crate::gates::Deficiency;
use std::time::Duration;
use thiserror::Error;

/// Failure of one dispatch attempt. Every variant is treated as a failed
/// gate by the rework loop and retried within the configured bound.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker timed out after {}s", after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("Worker exited with code {exit_code}: {message}")]
    Failed { exit_code: i32, message: String },

    #[error("Worker returned a malformed manifest: {0}")]
    Malformed(String),

    #[error("Failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("No worker bound to phase {phase}")]
    Unbound { phase: String },

    #[error("Worker failed: {0}")]
    Other(String),
}

/// Errors from the deliverable registry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Deliverable {id} already recorded with different metadata")]
    Conflict { id: String },

    #[error("Failed to access deliverable record at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode deliverable record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Deliverable store lock poisoned")]
    LockPoisoned,
}

/// Errors from the audit log. A write failure is fatal for the run.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log entry: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to encode audit log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to read audit log at {path}: {message}")]
    Read {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("Audit log lock poisoned")]
    LockPoisoned,
}

/// Validation failures for a phase plan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Phase plan is empty")]
    Empty,

    #[error("Duplicate phase id {0}")]
    DuplicateId(String),

    #[error("Phase {phase} has position {position}, expected {expected}")]
    OutOfSequence {
        phase: String,
        position: u32,
        expected: u32,
    },

    #[error("Phase {0} has no completion criteria")]
    NoCriteria(String),

    #[error("Phase {phase} is declared parallel with unknown phase {partner}")]
    UnknownPartner { phase: String, partner: String },

    #[error("Phase {phase} can only run in parallel with its immediate successor, not {partner}")]
    PartnerNotAdjacent { phase: String, partner: String },

    #[error("More than one parallel pair declared ({first} and {second})")]
    MultiplePairs { first: String, second: String },

    #[error("Phase {phase} opens a parallel pair but declares no partial output threshold")]
    MissingThreshold { phase: String },

    #[error("Partial output threshold of phase {phase} names {kind}, which is not a required deliverable")]
    ThresholdNotRequired { phase: String, kind: String },

    #[error("Phase {phase} declares a partial output threshold but opens no parallel pair")]
    StrayThreshold { phase: String },
}

/// Errors raised by the phase state machine.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Unknown phase {0}")]
    UnknownPhase(String),

    #[error("Illegal transition for phase {phase}: {from} -> {to}")]
    IllegalTransition {
        phase: String,
        from: crate::orchestrator::PhaseStatus,
        to: crate::orchestrator::PhaseStatus,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Phase {phase} cannot complete: {}", format_deficiencies(deficiencies))]
    IncompleteManifest {
        phase: String,
        deficiencies: Vec<Deficiency>,
    },

    #[error("Retry counter for phase {phase} cannot move from {current} back to {requested}")]
    RetryRegression {
        phase: String,
        current: u32,
        requested: u32,
    },

    #[error("Failed to persist workflow state at {path}: {source}")]
    Persist {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load workflow state at {path}: {message}")]
    Load {
        path: std::path::PathBuf,
        message: String,
    },
}

/// Errors surfaced to the operator by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(
        "Phase {phase} BLOCKED after {retries}/{max_retries} retries; deficiencies: {}",
        format_deficiencies(deficiencies)
    )]
    RetryLimitExceeded {
        phase: String,
        retries: u32,
        max_retries: u32,
        deficiencies: Vec<Deficiency>,
    },

    #[error("Audit log write failed, run aborted: {0}")]
    LogWriteFailure(#[source] AuditError),

    #[error("Terminal phase {phase} is not complete")]
    NotComplete { phase: String },

    #[error("Rework controller for phase {phase} failed: {message}")]
    ControllerFailed { phase: String, message: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl From<AuditError> for OrchestratorError {
    fn from(err: AuditError) -> Self {
        OrchestratorError::LogWriteFailure(err)
    }
}

/// Render a deficiency list for operator-facing messages.
pub fn format_deficiencies(deficiencies: &[Deficiency]) -> String {
    if deficiencies.is_empty() {
        return "none".to_string();
    }
    deficiencies
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
