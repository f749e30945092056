//! Quality gate evaluation.
//!
//! The gate is a pure function of a phase's completion criteria and a
//! deliverable manifest. It passes only when every required type is present
//! and every entry of a required type reports `complete`; there is no partial
//! credit. The same check answers whether the frozen partial-output threshold
//! of a parallel pair has been reached.

use crate::deliverable::Manifest;
use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Why a required deliverable type failed the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeficiencyKind {
    /// No entry of the required type in the manifest
    Missing,
    /// Present, but at least one entry of the type is still a draft
    NotComplete,
}

/// One failed criterion, fed back into the next task on rework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deficiency {
    pub deliverable_type: String,
    pub kind: DeficiencyKind,
}

impl Deficiency {
    pub fn missing(kind: &str) -> Self {
        Self {
            deliverable_type: kind.to_string(),
            kind: DeficiencyKind::Missing,
        }
    }

    pub fn not_complete(kind: &str) -> Self {
        Self {
            deliverable_type: kind.to_string(),
            kind: DeficiencyKind::NotComplete,
        }
    }
}

impl std::fmt::Display for Deficiency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            DeficiencyKind::Missing => write!(f, "missing: {}", self.deliverable_type),
            DeficiencyKind::NotComplete => {
                write!(f, "not complete: {}", self.deliverable_type)
            }
        }
    }
}

/// Result of a gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Pass,
    Fail { deficiencies: Vec<Deficiency> },
}

impl GateVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateVerdict::Pass)
    }

    pub fn deficiencies(&self) -> &[Deficiency] {
        match self {
            GateVerdict::Pass => &[],
            GateVerdict::Fail { deficiencies } => deficiencies,
        }
    }

    pub fn into_deficiencies(self) -> Vec<Deficiency> {
        match self {
            GateVerdict::Pass => Vec::new(),
            GateVerdict::Fail { deficiencies } => deficiencies,
        }
    }
}

/// Evaluate a manifest against a set of required types.
///
/// Deficiencies come back in criteria order (sorted by type), so the
/// verdict for a given input is always identical.
pub fn evaluate(criteria: &BTreeSet<String>, manifest: &Manifest) -> GateVerdict {
    let mut deficiencies = Vec::new();

    for required in criteria {
        let mut entries = manifest.of_type(required).peekable();
        if entries.peek().is_none() {
            deficiencies.push(Deficiency::missing(required));
        } else if !entries.all(|d| d.is_complete()) {
            deficiencies.push(Deficiency::not_complete(required));
        }
    }

    if deficiencies.is_empty() {
        GateVerdict::Pass
    } else {
        GateVerdict::Fail { deficiencies }
    }
}

/// Evaluate a manifest against a phase's completion criteria.
pub fn evaluate_phase(phase: &Phase, manifest: &Manifest) -> GateVerdict {
    evaluate(&phase.criteria, manifest)
}

/// True when the phase's partial-output threshold is satisfied by `manifest`.
/// Phases without a threshold never report it reached.
pub fn threshold_reached(phase: &Phase, manifest: &Manifest) -> bool {
    !phase.partial_threshold.is_empty() && evaluate(&phase.partial_threshold, manifest).is_pass()
}
