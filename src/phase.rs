//! Phase definitions and JSON loading.
//!
//! This module provides:
//! - `Phase`, one stage of the production sequence with its completion criteria
//! - `PhasePlan`, a validated, immutable sequence of phases
//! - `PhasesFile`, the on-disk `phases.json` format
//! - The default course-production plan written by `stagehand init`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::errors::PlanError;

/// A single stage of the production sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phase {
    /// Phase identifier (e.g., "01", "02")
    pub id: String,
    /// Human-readable name of the phase
    pub name: String,
    /// 1-based position in the sequence
    pub position: u32,
    /// Task description handed to the worker
    #[serde(default)]
    pub description: String,
    /// Deliverable types that must all be present and complete
    pub criteria: BTreeSet<String>,
    /// The one phase this phase may run alongside
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_with: Option<String>,
    /// Frozen subset of `criteria` whose completion lets the partner start
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub partial_threshold: BTreeSet<String>,
}

impl Phase {
    /// Create a phase with the given criteria. Position is assigned by
    /// `PhasePlan::sequence`.
    pub fn new(id: &str, name: &str, criteria: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            position: 0,
            description: String::new(),
            criteria: criteria.iter().map(|c| c.to_string()).collect(),
            parallel_with: None,
            partial_threshold: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Declare this phase parallel with `partner`, which may start once
    /// `threshold` deliverables of this phase are complete.
    pub fn parallel_with(mut self, partner: &str, threshold: &[&str]) -> Self {
        self.parallel_with = Some(partner.to_string());
        self.partial_threshold = threshold.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Task description, falling back to the phase name.
    pub fn task_description(&self) -> String {
        if self.description.is_empty() {
            format!("Produce the {} deliverables", self.name.to_lowercase())
        } else {
            self.description.clone()
        }
    }
}

/// A validated phase sequence.
///
/// Positions run 1..=n in order, ids are unique, every phase has criteria,
/// and at most one adjacent pair is declared parallel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePlan {
    phases: Vec<Phase>,
    pair: Option<(usize, usize)>,
}

impl PhasePlan {
    pub fn new(phases: Vec<Phase>) -> Result<Self, PlanError> {
        let pair = validate(&phases)?;
        Ok(Self { phases, pair })
    }

    /// Build a plan from phases in order, assigning positions 1..=n.
    pub fn sequence(mut phases: Vec<Phase>) -> Result<Self, PlanError> {
        for (i, phase) in phases.iter_mut().enumerate() {
            phase.position = i as u32 + 1;
        }
        Self::new(phases)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.id == id)
    }

    pub fn at(&self, index: usize) -> Option<&Phase> {
        self.phases.get(index)
    }

    /// The last phase in sequence; its completion ends the run.
    pub fn terminal(&self) -> &Phase {
        // validate() rejects empty plans
        &self.phases[self.phases.len() - 1]
    }

    /// Indices of the declared parallel pair (leader, partner).
    pub fn pair(&self) -> Option<(usize, usize)> {
        self.pair
    }

    /// True if `a` and `b` are the declared pair, in either order.
    pub fn is_declared_pair(&self, a: &str, b: &str) -> bool {
        match self.pair {
            Some((l, p)) => {
                let (l, p) = (&self.phases[l].id, &self.phases[p].id);
                (l == a && p == b) || (l == b && p == a)
            }
            None => false,
        }
    }

    /// The partner of the pair leader at `index`, if that phase leads the pair.
    pub fn partner_of_leader(&self, index: usize) -> Option<usize> {
        self.pair.filter(|(l, _)| *l == index).map(|(_, p)| p)
    }

    /// The leader of the pair whose partner sits at `index`.
    pub fn leader_of_partner(&self, index: usize) -> Option<usize> {
        self.pair.filter(|(_, p)| *p == index).map(|(l, _)| l)
    }
}

fn validate(phases: &[Phase]) -> Result<Option<(usize, usize)>, PlanError> {
    if phases.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut seen = BTreeSet::new();
    for (i, phase) in phases.iter().enumerate() {
        if !seen.insert(phase.id.as_str()) {
            return Err(PlanError::DuplicateId(phase.id.clone()));
        }
        let expected = i as u32 + 1;
        if phase.position != expected {
            return Err(PlanError::OutOfSequence {
                phase: phase.id.clone(),
                position: phase.position,
                expected,
            });
        }
        if phase.criteria.is_empty() {
            return Err(PlanError::NoCriteria(phase.id.clone()));
        }
    }

    let mut pair: Option<(usize, usize)> = None;
    for (i, phase) in phases.iter().enumerate() {
        let Some(partner) = &phase.parallel_with else {
            continue;
        };
        let j = phases
            .iter()
            .position(|p| &p.id == partner)
            .ok_or_else(|| PlanError::UnknownPartner {
                phase: phase.id.clone(),
                partner: partner.clone(),
            })?;
        let candidate = if j == i + 1 {
            (i, j)
        } else if j + 1 == i {
            (j, i)
        } else {
            return Err(PlanError::PartnerNotAdjacent {
                phase: phase.id.clone(),
                partner: partner.clone(),
            });
        };
        match pair {
            Some(existing) if existing != candidate => {
                return Err(PlanError::MultiplePairs {
                    first: phases[existing.0].id.clone(),
                    second: phases[candidate.0].id.clone(),
                });
            }
            _ => pair = Some(candidate),
        }
    }

    for (i, phase) in phases.iter().enumerate() {
        let leads_pair = pair.map(|(l, _)| l == i).unwrap_or(false);
        if leads_pair {
            if phase.partial_threshold.is_empty() {
                return Err(PlanError::MissingThreshold {
                    phase: phase.id.clone(),
                });
            }
            if let Some(kind) = phase
                .partial_threshold
                .iter()
                .find(|k| !phase.criteria.contains(*k))
            {
                return Err(PlanError::ThresholdNotRequired {
                    phase: phase.id.clone(),
                    kind: kind.clone(),
                });
            }
        } else if !phase.partial_threshold.is_empty() {
            return Err(PlanError::StrayThreshold {
                phase: phase.id.clone(),
            });
        }
    }

    Ok(pair)
}

/// Represents the full phases.json file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasesFile {
    /// Timestamp when the plan was written
    pub created_at: String,
    /// Phases in sequence order
    pub phases: Vec<Phase>,
}

impl PhasesFile {
    /// Load phases from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read phases file: {}", path.display()))?;

        let phases_file: PhasesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse phases JSON: {}", path.display()))?;

        Ok(phases_file)
    }

    /// Save phases to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize phases to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write phases file: {}", path.display()))?;

        Ok(())
    }

    /// Validate into an executable plan.
    pub fn into_plan(self) -> Result<PhasePlan> {
        PhasePlan::new(self.phases).context("Invalid phase plan")
    }
}

/// Load and validate the plan at `path`.
pub fn load_plan(path: &Path) -> Result<PhasePlan> {
    PhasesFile::load(path)?.into_plan()
}

/// The default course-production sequence. Lesson scripts and quizzes form
/// the parallel pair: quiz writing starts once lesson scripts are frozen.
pub fn default_phases() -> Vec<Phase> {
    let phases = vec![
        Phase::new("01", "Course structure", &["structure", "learning-objectives"])
            .with_description("Define the module structure and learning objectives"),
        Phase::new("02", "Assessment plan", &["assessment-plan"])
            .with_description("Plan how each learning objective will be assessed"),
        Phase::new("03", "Lesson scripts", &["lesson-script", "slide-outline"])
            .with_description("Write lesson scripts and slide outlines for every lesson")
            .parallel_with("04", &["lesson-script"]),
        Phase::new("04", "Quizzes", &["quiz", "answer-key"])
            .with_description("Write quizzes and answer keys from the frozen lesson scripts"),
        Phase::new("05", "Labs", &["lab-narrative", "starter-code"])
            .with_description("Write lab narratives with starter code"),
        Phase::new("06", "Final review", &["review-report", "handoff-checklist"])
            .with_description("Review all deliverables and prepare the handoff checklist"),
    ];
    phases
        .into_iter()
        .enumerate()
        .map(|(i, mut p)| {
            p.position = i as u32 + 1;
            p
        })
        .collect()
}

/// The default plan, validated.
pub fn default_plan() -> PhasePlan {
    PhasePlan {
        pair: Some((2, 3)),
        phases: default_phases(),
    }
}
