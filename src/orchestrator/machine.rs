use super::state::{PhaseStatus, StateStore, WorkflowState};
use crate::audit::AuditLog;
use crate::deliverable::{Deliverable, Manifest};
use crate::dispatch::Task;
use crate::errors::{AuditError, OrchestratorError, StateError};
use crate::gates::{self, Deficiency, GateVerdict};
use crate::handoff::{self, HandoffPackage};
use crate::phase::{Phase, PhasePlan};
use crate::rework::{ControllerEvent, HaltSignal, ReworkController, ReworkOutcome};
use crate::ui::RunUI;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;

type LoopResult = (String, Result<ReworkOutcome, AuditError>);

/// What one call to [`PhaseMachine::advance`] achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// These phases completed; the run continues
    Advanced { completed: Vec<String> },
    /// The terminal phase completed and the handoff package was assembled
    RunComplete(Box<HandoffPackage>),
    /// Nothing left to do
    AlreadyComplete,
}

/// Result of a validation checkpoint. Nothing is written.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub phase: String,
    pub status: PhaseStatus,
    /// Entries in the manifest that was evaluated
    pub evaluated: usize,
    pub verdict: GateVerdict,
}

/// The first phase in sequence that is not COMPLETE.
pub fn current_phase<'a>(plan: &'a PhasePlan, state: &WorkflowState) -> Option<&'a Phase> {
    plan.phases()
        .iter()
        .find(|p| state.status(&p.id) != Some(PhaseStatus::Complete))
}

/// Validation checkpoint: evaluate the current phase's most recent manifest
/// against its criteria. Reads state only.
pub fn checkpoint(plan: &PhasePlan, state: &WorkflowState) -> Option<Checkpoint> {
    let phase = current_phase(plan, state)?;
    let record = state.record(&phase.id)?;
    let manifest = record.last_manifest.clone().unwrap_or_default();
    Some(Checkpoint {
        phase: phase.id.clone(),
        status: record.status,
        evaluated: manifest.len(),
        verdict: gates::evaluate_phase(phase, &manifest),
    })
}

/// Drives phases through their lifecycle.
///
/// Phases run strictly in sequence, one rework loop at a time, except for the
/// declared parallel pair: once the leader's partial output threshold is
/// frozen, the partner's loop starts beside it. Loops report back over a
/// channel and this machine is the only writer of the workflow state, which
/// is persisted after every change.
pub struct PhaseMachine {
    plan: PhasePlan,
    state: WorkflowState,
    controller: Arc<ReworkController>,
    audit: Arc<AuditLog>,
    store: Option<StateStore>,
    ui: Option<Arc<RunUI>>,
}

impl PhaseMachine {
    /// Machine for a fresh run.
    pub fn new(plan: PhasePlan, controller: ReworkController, audit: Arc<AuditLog>) -> Self {
        let state = WorkflowState::new(&plan);
        Self {
            plan,
            state,
            controller: Arc::new(controller),
            audit,
            store: None,
            ui: None,
        }
    }

    /// Machine continuing a persisted run.
    pub fn with_state(
        plan: PhasePlan,
        state: WorkflowState,
        controller: ReworkController,
        audit: Arc<AuditLog>,
    ) -> Result<Self, StateError> {
        state.ensure_matches(&plan)?;
        Ok(Self {
            plan,
            state,
            controller: Arc::new(controller),
            audit,
            store: None,
            ui: None,
        })
    }

    /// Persist the workflow state through `store` after every change.
    pub fn persist_to(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_ui(mut self, ui: Arc<RunUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn max_retries(&self) -> u32 {
        self.controller.max_retries()
    }

    /// The first phase in sequence that is not COMPLETE.
    pub fn current_phase(&self) -> Option<&Phase> {
        current_phase(&self.plan, &self.state)
    }

    fn save(&self) -> Result<(), OrchestratorError> {
        if let Some(store) = &self.store {
            store.save(&self.state)?;
        }
        Ok(())
    }

    /// Evaluate the current phase's latest manifest without dispatching.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        checkpoint(&self.plan, &self.state)
    }

    /// Operator override for a BLOCKED phase: reset its retry counter and put
    /// it back IN_PROGRESS. A pair partner that was halted alongside it is
    /// resumed too. Returns the resumed phase ids.
    pub fn resume(&mut self, phase: &str) -> Result<Vec<String>, OrchestratorError> {
        let index = self
            .plan
            .index_of(phase)
            .ok_or_else(|| StateError::UnknownPhase(phase.to_string()))?;
        self.state.resume_blocked(&self.plan, phase)?;
        let mut resumed = vec![phase.to_string()];

        let counterpart = self
            .plan
            .partner_of_leader(index)
            .or_else(|| self.plan.leader_of_partner(index))
            .map(|i| self.plan.phases()[i].id.clone());
        if let Some(other) = counterpart {
            let halted = self
                .state
                .record(&other)
                .is_some_and(|r| r.status == PhaseStatus::Blocked && r.halted);
            if halted {
                self.state.resume_blocked(&self.plan, &other)?;
                resumed.push(other);
            }
        }

        tracing::info!(phases = ?resumed, "resumed by operator");
        self.save()?;
        Ok(resumed)
    }

    /// The surfaced error for a halted pipeline.
    fn blocked_error(&self) -> Option<OrchestratorError> {
        let blocked = self.state.blocked();
        let record = blocked
            .iter()
            .find(|r| !r.halted)
            .or_else(|| blocked.first())?;
        Some(OrchestratorError::RetryLimitExceeded {
            phase: record.phase.clone(),
            retries: record.retries,
            max_retries: self.state.max_retries.unwrap_or(self.max_retries()),
            deficiencies: record.deficiencies.clone(),
        })
    }

    /// Execute the current phase (both loops, for the parallel pair) until
    /// each loop has passed, blocked or halted.
    pub async fn advance(&mut self) -> Result<AdvanceOutcome, OrchestratorError> {
        if self.state.is_complete() {
            return Ok(AdvanceOutcome::AlreadyComplete);
        }
        if let Some(err) = self.blocked_error() {
            return Err(err);
        }

        self.state.max_retries = Some(self.max_retries());
        let active = self.select_active()?;
        let completed = self.run_loops(active).await?;

        if let Some(err) = self.blocked_error() {
            return Err(err);
        }

        if self.state.is_complete() {
            let package = handoff::aggregate(&self.plan, &self.state, &self.audit.entries()?)?;
            tracing::info!(
                run_id = %package.run_id,
                phases = package.phases.len(),
                total_retries = package.total_retries,
                "run complete"
            );
            return Ok(AdvanceOutcome::RunComplete(Box::new(package)));
        }
        Ok(AdvanceOutcome::Advanced { completed })
    }

    /// Advance until the run completes or blocks.
    pub async fn run(&mut self) -> Result<HandoffPackage, OrchestratorError> {
        loop {
            match self.advance().await? {
                AdvanceOutcome::RunComplete(package) => return Ok(*package),
                AdvanceOutcome::Advanced { .. } => continue,
                AdvanceOutcome::AlreadyComplete => {
                    return handoff::aggregate(&self.plan, &self.state, &self.audit.entries()?);
                }
            }
        }
    }

    /// Phases to drive in this step. Phases left IN_PROGRESS by an
    /// interrupted run (or an operator resume) are re-executed; otherwise the
    /// current phase is started.
    fn select_active(&mut self) -> Result<Vec<String>, OrchestratorError> {
        let mut active: Vec<String> = self
            .state
            .in_progress()
            .into_iter()
            .map(String::from)
            .collect();

        if active.is_empty() {
            let next = self
                .current_phase()
                .map(|p| p.id.clone())
                .ok_or_else(|| StateError::InvariantViolation("no phase left to run".into()))?;
            self.state.start(&self.plan, &next)?;
            self.save()?;
            active.push(next);
        } else if active.len() > 2
            || (active.len() == 2 && !self.plan.is_declared_pair(&active[0], &active[1]))
        {
            return Err(StateError::InvariantViolation(format!(
                "phases {} are IN_PROGRESS together",
                active.join(", ")
            ))
            .into());
        }

        // A leader recovered after freezing its threshold owes its partner a start
        if let Some((leader, partner)) = self.plan.pair() {
            let leader_id = self.plan.phases()[leader].id.clone();
            let partner_id = self.plan.phases()[partner].id.clone();
            let frozen = self
                .state
                .record(&leader_id)
                .is_some_and(|r| r.threshold_manifest.is_some());
            if active.contains(&leader_id)
                && frozen
                && self.state.status(&partner_id) == Some(PhaseStatus::NotStarted)
            {
                self.state.start(&self.plan, &partner_id)?;
                self.save()?;
                active.push(partner_id);
            }
        }
        Ok(active)
    }

    /// Inputs handed to a phase's worker.
    ///
    /// The pair partner gets only the leader's frozen threshold subset. The
    /// phase after the pair gets both members' deliverables. Every other
    /// phase gets its predecessor's final deliverables.
    fn inputs_for(&self, index: usize) -> Vec<Deliverable> {
        if let Some(leader) = self.plan.leader_of_partner(index) {
            return self
                .state
                .record(&self.plan.phases()[leader].id)
                .and_then(|r| r.threshold_manifest.clone())
                .map(Manifest::into_inner)
                .unwrap_or_default();
        }
        if index == 0 {
            return Vec::new();
        }

        let prev = index - 1;
        let sources = match self.plan.leader_of_partner(prev) {
            Some(leader) => vec![leader, prev],
            None => vec![prev],
        };
        sources
            .into_iter()
            .filter_map(|i| self.state.record(&self.plan.phases()[i].id))
            .flat_map(|r| r.deliverables.iter().cloned())
            .collect()
    }

    fn spawn_loop(
        &self,
        join: &mut JoinSet<LoopResult>,
        phase_id: &str,
        halt: &HaltSignal,
        events: &UnboundedSender<ControllerEvent>,
    ) -> Result<(), OrchestratorError> {
        let index = self
            .plan
            .index_of(phase_id)
            .ok_or_else(|| StateError::UnknownPhase(phase_id.to_string()))?;
        let phase = self.plan.phases()[index].clone();
        let retries = self.state.record(phase_id).map(|r| r.retries).unwrap_or(0);
        let task = Task::new(&phase, self.inputs_for(index));

        if let Some(ui) = &self.ui {
            ui.phase_started(&phase.id, &phase.name, retries, self.max_retries());
        }
        tracing::info!(
            phase = %phase.id,
            retries,
            max_retries = self.max_retries(),
            inputs = task.inputs.len(),
            "phase started"
        );

        let controller = Arc::clone(&self.controller);
        let halt = halt.clone();
        let events = events.clone();
        join.spawn(async move {
            let result = controller.execute(&phase, task, retries, &halt, &events).await;
            (phase.id, result)
        });
        Ok(())
    }

    /// Run the given loops to settlement, applying their events to the
    /// workflow state as they arrive. Returns the phases that completed.
    ///
    /// On error the remaining loops are halted and awaited, so a worker that
    /// is mid-dispatch finishes its attempt before the error surfaces.
    async fn run_loops(&mut self, active: Vec<String>) -> Result<Vec<String>, OrchestratorError> {
        let halt = HaltSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut join = JoinSet::new();
        let mut completed = Vec::new();

        let settled = self
            .settle_loops(&active, &mut join, &mut rx, &halt, &tx, &mut completed)
            .await;
        if let Err(err) = settled {
            halt.raise();
            if !join.is_empty() {
                tracing::warn!(
                    loops = join.len(),
                    error = %err,
                    "waiting for in-flight phase loops before aborting"
                );
            }
            while join.join_next().await.is_some() {}
            return Err(err);
        }
        Ok(completed)
    }

    async fn settle_loops(
        &mut self,
        active: &[String],
        join: &mut JoinSet<LoopResult>,
        rx: &mut UnboundedReceiver<ControllerEvent>,
        halt: &HaltSignal,
        tx: &UnboundedSender<ControllerEvent>,
        completed: &mut Vec<String>,
    ) -> Result<(), OrchestratorError> {
        for id in active {
            self.spawn_loop(join, id, halt, tx)?;
        }

        loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => {
                    self.apply_event(event, join, halt, tx)?;
                }
                joined = join.join_next() => {
                    let Some(joined) = joined else { break };
                    // Every event a loop sent happens before it finishes
                    self.drain_events(rx, join, halt, tx)?;
                    let (phase, result) = joined.map_err(|e| OrchestratorError::ControllerFailed {
                        phase: "unknown".to_string(),
                        message: e.to_string(),
                    })?;
                    let outcome = match result {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            tracing::error!(phase = %phase, error = %err, "audit log write failed; aborting run");
                            return Err(OrchestratorError::LogWriteFailure(err));
                        }
                    };
                    if let Some(done) = self.apply_outcome(&phase, outcome, join, halt, tx)? {
                        completed.push(done);
                    }
                }
            }
        }

        self.drain_events(rx, join, halt, tx)
    }

    fn drain_events(
        &mut self,
        rx: &mut UnboundedReceiver<ControllerEvent>,
        join: &mut JoinSet<LoopResult>,
        halt: &HaltSignal,
        tx: &UnboundedSender<ControllerEvent>,
    ) -> Result<(), OrchestratorError> {
        while let Ok(event) = rx.try_recv() {
            self.apply_event(event, join, halt, tx)?;
        }
        Ok(())
    }

    fn apply_event(
        &mut self,
        event: ControllerEvent,
        join: &mut JoinSet<LoopResult>,
        halt: &HaltSignal,
        tx: &UnboundedSender<ControllerEvent>,
    ) -> Result<(), OrchestratorError> {
        match event {
            ControllerEvent::RetryRecorded { phase, retries } => {
                self.state.record_retry(&phase, retries)?;
                tracing::info!(phase = %phase, retries, max_retries = self.max_retries(), "retry recorded");
                if let Some(ui) = &self.ui {
                    let deficiencies = self
                        .state
                        .record(&phase)
                        .map(|r| r.deficiencies.clone())
                        .unwrap_or_default();
                    ui.retry(&phase, retries, self.max_retries(), &deficiencies);
                }
            }
            ControllerEvent::AttemptFinished {
                phase,
                attempt,
                manifest,
                deficiencies,
            } => {
                if let Some(ui) = &self.ui {
                    ui.attempt(&phase, attempt);
                }
                self.state.record_attempt(&phase, manifest, deficiencies)?;
            }
            ControllerEvent::ThresholdReached { phase, deliverables } => {
                self.state.freeze_threshold(&phase, deliverables)?;
                self.save()?;
                self.start_partner(&phase, join, halt, tx)?;
            }
        }
        self.save()
    }

    /// Start the partner of `leader` if its threshold is frozen and the
    /// partner has not started yet.
    fn start_partner(
        &mut self,
        leader: &str,
        join: &mut JoinSet<LoopResult>,
        halt: &HaltSignal,
        tx: &UnboundedSender<ControllerEvent>,
    ) -> Result<(), OrchestratorError> {
        let Some(partner) = self
            .plan
            .index_of(leader)
            .and_then(|i| self.plan.partner_of_leader(i))
            .map(|i| self.plan.phases()[i].id.clone())
        else {
            return Ok(());
        };
        if halt.is_raised() || self.state.status(&partner) != Some(PhaseStatus::NotStarted) {
            return Ok(());
        }

        self.state.start(&self.plan, &partner)?;
        self.save()?;
        if let Some(ui) = &self.ui {
            ui.threshold_reached(leader, &partner);
        }
        self.spawn_loop(join, &partner, halt, tx)
    }

    fn apply_outcome(
        &mut self,
        phase: &str,
        outcome: ReworkOutcome,
        join: &mut JoinSet<LoopResult>,
        halt: &HaltSignal,
        tx: &UnboundedSender<ControllerEvent>,
    ) -> Result<Option<String>, OrchestratorError> {
        self.state.record_retry(phase, outcome.retries())?;
        match outcome {
            ReworkOutcome::Passed {
                manifest, retries, ..
            } => {
                // The leader may pass in the same attempt that first meets
                // its threshold; make sure the partner is running.
                if let Some(def) = self.plan.get(phase).filter(|p| !p.partial_threshold.is_empty()) {
                    let frozen = manifest.restricted_to(&def.partial_threshold);
                    self.state.freeze_threshold(phase, frozen)?;
                }
                self.state.complete(&self.plan, phase, manifest)?;
                self.save()?;
                tracing::info!(phase, retries, "phase complete");
                if let Some(ui) = &self.ui {
                    ui.phase_complete(phase, retries);
                }
                self.start_partner(phase, join, halt, tx)?;
                Ok(Some(phase.to_string()))
            }
            ReworkOutcome::Blocked {
                deficiencies,
                retries,
                ..
            } => {
                halt.raise();
                self.block(phase, deficiencies.clone(), false)?;
                tracing::warn!(phase, retries, max_retries = self.max_retries(), "phase BLOCKED");
                if let Some(ui) = &self.ui {
                    ui.phase_blocked(phase, &deficiencies);
                }
                Ok(None)
            }
            ReworkOutcome::Halted { deficiencies, .. } => {
                self.block(phase, deficiencies, true)?;
                tracing::warn!(phase, "phase halted by its parallel partner");
                if let Some(ui) = &self.ui {
                    ui.phase_halted(phase);
                }
                Ok(None)
            }
        }
    }

    fn block(
        &mut self,
        phase: &str,
        deficiencies: Vec<Deficiency>,
        halted: bool,
    ) -> Result<(), OrchestratorError> {
        self.state.block(phase, deficiencies, halted)?;
        self.save()
    }
}
