//! Audit log records.
//!
//! Every dispatch attempt and every gate verdict produces exactly one
//! `LogEntry`. Entries are append-only and totally ordered: each carries a
//! sequence number and a timestamp strictly greater than its predecessor's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What produced the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Dispatch,
    Gate,
}

/// Outcome recorded by the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Worker returned a well-formed manifest
    Delivered,
    /// Worker did not answer within its timeout
    Timeout,
    /// Worker failed or returned a malformed manifest
    WorkerError,
    Pass,
    Fail,
}

impl EntryStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EntryStatus::Timeout | EntryStatus::WorkerError | EntryStatus::Fail
        )
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryStatus::Delivered => "delivered",
            EntryStatus::Timeout => "timeout",
            EntryStatus::WorkerError => "worker_error",
            EntryStatus::Pass => "pass",
            EntryStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// 1-based position in the log
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub kind: EntryKind,
    /// Attempt number within the phase (1-based)
    pub attempt: u32,
    /// Identity of the invoked worker
    pub worker: String,
    /// Task summary
    pub task: String,
    /// Output summary
    pub output: String,
    /// What the orchestrator does next
    pub next_step: String,
    pub status: EntryStatus,
}

/// Entry contents supplied by the caller; sequence and timestamp are
/// assigned by the log under its write lock.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub phase: String,
    pub kind: EntryKind,
    pub attempt: u32,
    pub worker: String,
    pub task: String,
    pub output: String,
    pub next_step: String,
    pub status: EntryStatus,
}

impl EntryDraft {
    pub fn dispatch(phase: &str, attempt: u32, worker: &str, status: EntryStatus) -> Self {
        Self {
            phase: phase.to_string(),
            kind: EntryKind::Dispatch,
            attempt,
            worker: worker.to_string(),
            task: String::new(),
            output: String::new(),
            next_step: String::new(),
            status,
        }
    }

    pub fn gate(phase: &str, attempt: u32, worker: &str, status: EntryStatus) -> Self {
        Self {
            kind: EntryKind::Gate,
            ..Self::dispatch(phase, attempt, worker, status)
        }
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn next_step(mut self, next_step: impl Into<String>) -> Self {
        self.next_step = next_step.into();
        self
    }
}

pub mod logger;
pub use logger::{AuditLog, FileSink, LogSink, MemorySink};
