//! Phase state machine.
//!
//! `state` holds the per-run workflow state and its transition rules;
//! `machine` drives rework loops against it.

pub mod machine;
pub mod state;

pub use machine::{AdvanceOutcome, Checkpoint, PhaseMachine, checkpoint, current_phase};
pub use state::{PhaseRecord, PhaseStatus, StateStore, Transition, WorkflowState};
