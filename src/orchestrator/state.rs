use crate::deliverable::Manifest;
use crate::errors::StateError;
use crate::gates::{self, Deficiency, GateVerdict};
use crate::phase::PhasePlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Blocked,
    Complete,
}

impl PhaseStatus {
    /// Whether `self -> to` is an edge of the lifecycle. BLOCKED -> IN_PROGRESS
    /// is not; only an operator resume may take it.
    pub fn can_transition_to(self, to: PhaseStatus) -> bool {
        matches!(
            (self, to),
            (PhaseStatus::NotStarted, PhaseStatus::InProgress)
                | (PhaseStatus::InProgress, PhaseStatus::Complete)
                | (PhaseStatus::InProgress, PhaseStatus::Blocked)
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseStatus::NotStarted => "NOT_STARTED",
            PhaseStatus::InProgress => "IN_PROGRESS",
            PhaseStatus::Blocked => "BLOCKED",
            PhaseStatus::Complete => "COMPLETE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: String,
    pub status: PhaseStatus,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Final manifest, set on completion
    #[serde(default)]
    pub deliverables: Manifest,
    /// Manifest of the most recent well-formed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_manifest: Option<Manifest>,
    /// Deficiencies of the most recent failed attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deficiencies: Vec<Deficiency>,
    /// Frozen partial output handed to the parallel partner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_manifest: Option<Manifest>,
    /// Blocked because the other loop of its pair blocked
    #[serde(default)]
    pub halted: bool,
}

impl PhaseRecord {
    fn new(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            status: PhaseStatus::NotStarted,
            retries: 0,
            started_at: None,
            finished_at: None,
            deliverables: Manifest::default(),
            last_manifest: None,
            deficiencies: Vec::new(),
            threshold_manifest: None,
            halted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub phase: String,
    pub from: PhaseStatus,
    pub to: PhaseStatus,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Per-run workflow state: status and retry counter per phase, plus the
/// transition history. Mutated only through the methods below, each of which
/// checks the lifecycle and the plan's sequencing rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Retry bound of the most recent execution, recorded for reporting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    pub phases: Vec<PhaseRecord>,
    #[serde(default)]
    pub history: Vec<Transition>,
}

impl WorkflowState {
    pub fn new(plan: &PhasePlan) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            max_retries: None,
            phases: plan.phases().iter().map(|p| PhaseRecord::new(&p.id)).collect(),
            history: Vec::new(),
        }
    }

    /// Check that a loaded state was built from `plan`.
    pub fn ensure_matches(&self, plan: &PhasePlan) -> Result<(), StateError> {
        let ids: Vec<&str> = self.phases.iter().map(|r| r.phase.as_str()).collect();
        let expected: Vec<&str> = plan.phases().iter().map(|p| p.id.as_str()).collect();
        if ids != expected {
            return Err(StateError::InvariantViolation(format!(
                "workflow state tracks phases [{}] but the plan defines [{}]",
                ids.join(", "),
                expected.join(", ")
            )));
        }
        Ok(())
    }

    pub fn record(&self, phase: &str) -> Option<&PhaseRecord> {
        self.phases.iter().find(|r| r.phase == phase)
    }

    fn record_mut(&mut self, phase: &str) -> Result<&mut PhaseRecord, StateError> {
        self.phases
            .iter_mut()
            .find(|r| r.phase == phase)
            .ok_or_else(|| StateError::UnknownPhase(phase.to_string()))
    }

    pub fn status(&self, phase: &str) -> Option<PhaseStatus> {
        self.record(phase).map(|r| r.status)
    }

    pub fn in_progress(&self) -> Vec<&str> {
        self.phases
            .iter()
            .filter(|r| r.status == PhaseStatus::InProgress)
            .map(|r| r.phase.as_str())
            .collect()
    }

    pub fn blocked(&self) -> Vec<&PhaseRecord> {
        self.phases
            .iter()
            .filter(|r| r.status == PhaseStatus::Blocked)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn total_retries(&self) -> u32 {
        self.phases.iter().map(|r| r.retries).sum()
    }

    fn transition(
        &mut self,
        phase: &str,
        to: PhaseStatus,
        reason: &str,
    ) -> Result<(), StateError> {
        let record = self.record_mut(phase)?;
        let from = record.status;
        if !from.can_transition_to(to) {
            return Err(StateError::IllegalTransition {
                phase: phase.to_string(),
                from,
                to,
            });
        }
        record.status = to;
        self.push_history(phase, from, to, reason);
        Ok(())
    }

    fn push_history(&mut self, phase: &str, from: PhaseStatus, to: PhaseStatus, reason: &str) {
        tracing::debug!(phase, %from, %to, reason, "phase transition");
        self.history.push(Transition {
            phase: phase.to_string(),
            from,
            to,
            at: Utc::now(),
            reason: reason.to_string(),
        });
    }

    /// Only the declared pair may be IN_PROGRESS together.
    fn check_concurrency(&self, plan: &PhasePlan, phase: &str) -> Result<(), StateError> {
        for other in self.in_progress() {
            if other != phase && !plan.is_declared_pair(phase, other) {
                return Err(StateError::InvariantViolation(format!(
                    "phase {phase} cannot be IN_PROGRESS while phase {other} is IN_PROGRESS"
                )));
            }
        }
        Ok(())
    }

    /// NOT_STARTED -> IN_PROGRESS.
    ///
    /// The predecessor must be COMPLETE, except for the partner of the
    /// declared pair, which may start once its leader's partial output
    /// threshold has been frozen. Nothing starts while any phase is BLOCKED.
    pub fn start(&mut self, plan: &PhasePlan, phase: &str) -> Result<(), StateError> {
        let index = plan
            .index_of(phase)
            .ok_or_else(|| StateError::UnknownPhase(phase.to_string()))?;

        if let Some(blocked) = self.blocked().first() {
            return Err(StateError::InvariantViolation(format!(
                "phase {phase} cannot start while phase {} is BLOCKED",
                blocked.phase
            )));
        }

        let reason = if index == 0 {
            "first phase".to_string()
        } else {
            let prev = &plan.phases()[index - 1].id;
            let prev_record = self
                .record(prev)
                .ok_or_else(|| StateError::UnknownPhase(prev.clone()))?;
            if prev_record.status == PhaseStatus::Complete {
                format!("phase {prev} complete")
            } else if plan.leader_of_partner(index) == Some(index - 1)
                && prev_record.threshold_manifest.is_some()
            {
                format!("phase {prev} reached its partial output threshold")
            } else {
                return Err(StateError::InvariantViolation(format!(
                    "phase {phase} cannot start before phase {prev} is COMPLETE"
                )));
            }
        };

        self.check_concurrency(plan, phase)?;
        self.transition(phase, PhaseStatus::InProgress, &reason)?;
        self.record_mut(phase)?.started_at = Some(Utc::now());
        Ok(())
    }

    /// IN_PROGRESS -> COMPLETE, re-checking the manifest against the gate.
    pub fn complete(
        &mut self,
        plan: &PhasePlan,
        phase: &str,
        manifest: Manifest,
    ) -> Result<(), StateError> {
        let def = plan
            .get(phase)
            .ok_or_else(|| StateError::UnknownPhase(phase.to_string()))?;
        if let GateVerdict::Fail { deficiencies } = gates::evaluate_phase(def, &manifest) {
            return Err(StateError::IncompleteManifest {
                phase: phase.to_string(),
                deficiencies,
            });
        }

        self.transition(phase, PhaseStatus::Complete, "quality gate passed")?;
        let now = Utc::now();
        let record = self.record_mut(phase)?;
        record.deliverables = manifest;
        record.deficiencies.clear();
        record.finished_at = Some(now);

        // The pair may end the plan, so the terminal phase can finish while
        // its leader is still being reworked.
        if self
            .phases
            .iter()
            .all(|r| r.status == PhaseStatus::Complete)
        {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// IN_PROGRESS -> BLOCKED. `halted` marks a phase stopped because its
    /// pair partner blocked.
    pub fn block(
        &mut self,
        phase: &str,
        deficiencies: Vec<Deficiency>,
        halted: bool,
    ) -> Result<(), StateError> {
        let reason = if halted {
            "halted by parallel partner"
        } else {
            "retry limit exceeded"
        };
        self.transition(phase, PhaseStatus::Blocked, reason)?;
        let record = self.record_mut(phase)?;
        record.deficiencies = deficiencies;
        record.halted = halted;
        record.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Operator override: BLOCKED -> IN_PROGRESS with the retry counter reset.
    pub fn resume_blocked(&mut self, plan: &PhasePlan, phase: &str) -> Result<(), StateError> {
        let from = self
            .status(phase)
            .ok_or_else(|| StateError::UnknownPhase(phase.to_string()))?;
        if from != PhaseStatus::Blocked {
            return Err(StateError::IllegalTransition {
                phase: phase.to_string(),
                from,
                to: PhaseStatus::InProgress,
            });
        }
        self.check_concurrency(plan, phase)?;

        let record = self.record_mut(phase)?;
        record.status = PhaseStatus::InProgress;
        record.retries = 0;
        record.halted = false;
        record.finished_at = None;
        self.push_history(
            phase,
            PhaseStatus::Blocked,
            PhaseStatus::InProgress,
            "resumed by operator",
        );
        Ok(())
    }

    /// Set the retry counter. The counter never moves backwards within a
    /// run; only `resume_blocked` resets it.
    pub fn record_retry(&mut self, phase: &str, retries: u32) -> Result<(), StateError> {
        let record = self.record_mut(phase)?;
        if retries < record.retries {
            return Err(StateError::RetryRegression {
                phase: phase.to_string(),
                current: record.retries,
                requested: retries,
            });
        }
        record.retries = retries;
        Ok(())
    }

    /// Remember the outcome of the latest attempt.
    pub fn record_attempt(
        &mut self,
        phase: &str,
        manifest: Option<Manifest>,
        deficiencies: Vec<Deficiency>,
    ) -> Result<(), StateError> {
        let record = self.record_mut(phase)?;
        if manifest.is_some() {
            record.last_manifest = manifest;
        }
        record.deficiencies = deficiencies;
        Ok(())
    }

    /// Freeze the partial output of the pair leader. Only the first freeze
    /// sticks; returns the frozen manifest.
    pub fn freeze_threshold(
        &mut self,
        phase: &str,
        manifest: Manifest,
    ) -> Result<Manifest, StateError> {
        let record = self.record_mut(phase)?;
        Ok(record
            .threshold_manifest
            .get_or_insert(manifest)
            .clone())
    }
}

/// Persists the workflow state as JSON under the project directory.
pub struct StateStore {
    state_file: PathBuf,
}

impl StateStore {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    pub fn exists(&self) -> bool {
        self.state_file.exists()
    }

    /// Write the state atomically (temp file + rename).
    pub fn save(&self, state: &WorkflowState) -> Result<(), StateError> {
        let persist = |source| StateError::Persist {
            path: self.state_file.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| persist(std::io::Error::other(e)))?;
        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).map_err(persist)?;
        }
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(persist)?;
        fs::rename(&tmp, &self.state_file).map_err(persist)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<WorkflowState>, StateError> {
        if !self.state_file.exists() {
            return Ok(None);
        }
        let load_err = |message: String| StateError::Load {
            path: self.state_file.clone(),
            message,
        };
        let content = fs::read_to_string(&self.state_file).map_err(|e| load_err(e.to_string()))?;
        let state = serde_json::from_str(&content).map_err(|e| load_err(e.to_string()))?;
        Ok(Some(state))
    }

    /// Remove the persisted state.
    pub fn reset(&self) -> Result<(), StateError> {
        if self.state_file.exists() {
            fs::remove_file(&self.state_file).map_err(|source| StateError::Persist {
                path: self.state_file.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
