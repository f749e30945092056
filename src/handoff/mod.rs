//! Completion aggregation.
//!
//! Once the terminal phase is COMPLETE, every phase's final manifest is
//! walked in sequence order into a single handoff package. Nothing here
//! produces deliverables; it only reads the workflow state and the audit log.

use crate::audit::{EntryKind, LogEntry};
use crate::deliverable::Manifest;
use crate::errors::OrchestratorError;
use crate::orchestrator::{PhaseStatus, WorkflowState};
use crate::phase::PhasePlan;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseHandoff {
    pub phase: String,
    pub name: String,
    pub position: u32,
    pub deliverables: Manifest,
    pub retries: u32,
    /// Dispatch attempts recorded in the log
    pub attempts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_entry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_entry_at: Option<DateTime<Utc>>,
    /// Seconds between the phase's first and last log entry
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffPackage {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub assembled_at: DateTime<Utc>,
    pub phases: Vec<PhaseHandoff>,
    pub total_retries: u32,
    pub total_dispatches: usize,
}

impl HandoffPackage {
    pub fn deliverable_count(&self) -> usize {
        self.phases.iter().map(|p| p.deliverables.len()).sum()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize handoff package")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write handoff package: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read handoff package: {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse handoff package")
    }
}

/// Assemble the handoff package for a finished run.
pub fn aggregate(
    plan: &PhasePlan,
    state: &WorkflowState,
    entries: &[LogEntry],
) -> Result<HandoffPackage, OrchestratorError> {
    let terminal = plan.terminal();
    let completed_at = match (state.status(&terminal.id), state.completed_at) {
        (Some(PhaseStatus::Complete), Some(at)) => at,
        _ => {
            return Err(OrchestratorError::NotComplete {
                phase: terminal.id.clone(),
            });
        }
    };

    let mut phases = Vec::with_capacity(plan.len());
    for phase in plan.phases() {
        let record = state
            .record(&phase.id)
            .filter(|r| r.status == PhaseStatus::Complete)
            .ok_or_else(|| OrchestratorError::NotComplete {
                phase: phase.id.clone(),
            })?;

        let own: Vec<&LogEntry> = entries.iter().filter(|e| e.phase == phase.id).collect();
        let first_entry_at = own.iter().map(|e| e.timestamp).min();
        let last_entry_at = own.iter().map(|e| e.timestamp).max();
        let elapsed_secs = match (first_entry_at, last_entry_at) {
            (Some(first), Some(last)) => (last - first).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };

        phases.push(PhaseHandoff {
            phase: phase.id.clone(),
            name: phase.name.clone(),
            position: phase.position,
            deliverables: record.deliverables.clone(),
            retries: record.retries,
            attempts: own.iter().filter(|e| e.kind == EntryKind::Dispatch).count(),
            first_entry_at,
            last_entry_at,
            elapsed_secs,
        });
    }

    Ok(HandoffPackage {
        run_id: state.run_id,
        started_at: state.started_at,
        completed_at,
        assembled_at: Utc::now(),
        total_retries: phases.iter().map(|p| p.retries).sum(),
        total_dispatches: entries
            .iter()
            .filter(|e| e.kind == EntryKind::Dispatch)
            .count(),
        phases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLog, EntryDraft, EntryStatus};
    use crate::deliverable::Deliverable;
    use crate::phase::Phase;
    use tempfile::tempdir;

    fn plan() -> PhasePlan {
        PhasePlan::sequence(vec![
            Phase::new("01", "Outline", &["outline"]),
            Phase::new("02", "Draft", &["draft"]),
        ])
        .unwrap()
    }

    fn finished_state(plan: &PhasePlan) -> WorkflowState {
        let mut state = WorkflowState::new(plan);
        for (id, kind) in [("01", "outline"), ("02", "draft")] {
            state.start(plan, id).unwrap();
            state
                .complete(
                    plan,
                    id,
                    Manifest::new(vec![Deliverable::complete(kind, &format!("{kind}-1"))]),
                )
                .unwrap();
        }
        state
    }

    #[test]
    fn test_aggregate_walks_phases_in_order() {
        let plan = plan();
        let state = finished_state(&plan);
        let log = AuditLog::in_memory();
        for (phase, attempt) in [("01", 1), ("02", 1), ("02", 2)] {
            log.append(EntryDraft::dispatch(phase, attempt, "w", EntryStatus::Delivered))
                .unwrap();
            log.append(EntryDraft::gate(phase, attempt, "w", EntryStatus::Pass))
                .unwrap();
        }

        let package = aggregate(&plan, &state, &log.entries().unwrap()).unwrap();
        assert_eq!(package.run_id, state.run_id);
        assert_eq!(package.phases.len(), 2);
        assert_eq!(package.phases[0].phase, "01");
        assert_eq!(package.phases[1].attempts, 2);
        assert_eq!(package.total_dispatches, 3);
        assert_eq!(package.deliverable_count(), 2);
        let second = &package.phases[1];
        assert!(second.first_entry_at.unwrap() < second.last_entry_at.unwrap());
        assert!(second.elapsed_secs >= 0.0);
    }

    #[test]
    fn test_aggregate_refuses_unfinished_run() {
        let plan = plan();
        let mut state = WorkflowState::new(&plan);
        state.start(&plan, "01").unwrap();
        let err = aggregate(&plan, &state, &[]).unwrap_err();
        assert!(matches!(err, OrchestratorError::NotComplete { phase } if phase == "02"));
    }

    #[test]
    fn test_phase_without_entries_has_zero_elapsed() {
        let plan = plan();
        let state = finished_state(&plan);
        let package = aggregate(&plan, &state, &[]).unwrap();
        assert!(package.phases.iter().all(|p| p.elapsed_secs == 0.0));
        assert!(package.phases.iter().all(|p| p.first_entry_at.is_none()));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("handoff.json");
        let plan = plan();
        let package = aggregate(&plan, &finished_state(&plan), &[]).unwrap();
        package.save(&path).unwrap();
        assert_eq!(HandoffPackage::load(&path).unwrap(), package);
    }
}
