//! Bounded rework loop for a single phase.
//!
//! The controller dispatches the phase's task, runs the quality gate on the
//! returned manifest, and re-dispatches with the gate's deficiencies until the
//! gate passes or the retry bound is spent. A dispatch failure (timeout,
//! worker error, malformed manifest) counts as a failed gate with every
//! required type missing.
//!
//! Every dispatch attempt appends a dispatch entry and every evaluated
//! manifest appends a gate entry. A failed append ends the loop with the
//! `AuditError`; the caller aborts the run.
//!
//! State changes the orchestrator has to persist (retry increments,
//! per-attempt manifests, partial-output thresholds) are reported over an
//! unbounded channel as they happen, so a loop running beside another one
//! never touches shared workflow state itself.

use crate::audit::{AuditLog, EntryDraft, EntryStatus};
use crate::deliverable::Manifest;
use crate::dispatch::{Dispatcher, Task};
use crate::errors::{AuditError, WorkerError, format_deficiencies};
use crate::gates::{self, Deficiency, GateVerdict};
use crate::phase::Phase;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;

/// Default bound on retries per phase.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Shared stop flag. Raised when one loop of a parallel pair blocks so the
/// other stops before its next attempt.
#[derive(Debug, Clone, Default)]
pub struct HaltSignal(Arc<AtomicBool>);

impl HaltSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress reported by a running loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// The retry counter moved to `retries`
    RetryRecorded { phase: String, retries: u32 },
    /// An attempt ended; `manifest` is `None` when the dispatch failed
    AttemptFinished {
        phase: String,
        attempt: u32,
        manifest: Option<Manifest>,
        deficiencies: Vec<Deficiency>,
    },
    /// The partial-output threshold was met; `deliverables` is the frozen
    /// subset the partner phase starts from
    ThresholdReached { phase: String, deliverables: Manifest },
}

/// How a loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ReworkOutcome {
    Passed {
        manifest: Manifest,
        retries: u32,
        attempts: u32,
    },
    Blocked {
        deficiencies: Vec<Deficiency>,
        retries: u32,
        attempts: u32,
    },
    /// Stopped by the halt signal before another attempt
    Halted {
        deficiencies: Vec<Deficiency>,
        retries: u32,
    },
}

impl ReworkOutcome {
    pub fn retries(&self) -> u32 {
        match self {
            ReworkOutcome::Passed { retries, .. }
            | ReworkOutcome::Blocked { retries, .. }
            | ReworkOutcome::Halted { retries, .. } => *retries,
        }
    }
}

pub struct ReworkController {
    dispatcher: Arc<Dispatcher>,
    audit: Arc<AuditLog>,
    max_retries: u32,
}

impl ReworkController {
    pub fn new(dispatcher: Arc<Dispatcher>, audit: Arc<AuditLog>, max_retries: u32) -> Self {
        Self {
            dispatcher,
            audit,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Drive `phase` until it passes, blocks, or is halted.
    ///
    /// `retries` is the counter carried over from an interrupted run; the
    /// first attempt made here is attempt `retries + 1`.
    pub async fn execute(
        &self,
        phase: &Phase,
        mut task: Task,
        mut retries: u32,
        halt: &HaltSignal,
        events: &UnboundedSender<ControllerEvent>,
    ) -> Result<ReworkOutcome, AuditError> {
        let worker = self.dispatcher.worker_identity(&phase.id);
        let mut attempts = 0;
        let mut threshold_sent = false;
        let mut last_deficiencies = Vec::new();

        loop {
            if halt.is_raised() {
                tracing::info!(phase = %phase.id, retries, "rework halted");
                return Ok(ReworkOutcome::Halted {
                    deficiencies: last_deficiencies,
                    retries,
                });
            }

            task.attempt = retries + 1;
            attempts += 1;
            let will_retry = retries < self.max_retries;
            let retry_step = if will_retry {
                format!("retry {}/{}", retries + 1, self.max_retries)
            } else {
                "block phase".to_string()
            };

            tracing::info!(phase = %phase.id, attempt = task.attempt, %worker, "dispatching");
            let dispatched = self.dispatcher.dispatch(phase, &task).await;

            let (deficiencies, failure) = match dispatched {
                Ok(outcome) => {
                    self.audit.append(
                        EntryDraft::dispatch(&phase.id, task.attempt, &outcome.worker, EntryStatus::Delivered)
                            .task(task.summary())
                            .output(describe_delivery(&outcome.manifest, &outcome.summary))
                            .next_step("evaluate gate"),
                    )?;

                    if !threshold_sent && gates::threshold_reached(phase, &outcome.manifest) {
                        threshold_sent = true;
                        let frozen = outcome.manifest.restricted_to(&phase.partial_threshold);
                        tracing::info!(
                            phase = %phase.id,
                            deliverables = frozen.len(),
                            "partial output threshold reached"
                        );
                        let _ = events.send(ControllerEvent::ThresholdReached {
                            phase: phase.id.clone(),
                            deliverables: frozen,
                        });
                    }

                    let verdict = gates::evaluate_phase(phase, &outcome.manifest);
                    let (status, next_step) = match &verdict {
                        GateVerdict::Pass => (EntryStatus::Pass, "complete phase".to_string()),
                        GateVerdict::Fail { .. } => (EntryStatus::Fail, retry_step.clone()),
                    };
                    self.audit.append(
                        EntryDraft::gate(&phase.id, task.attempt, &outcome.worker, status)
                            .task(task.summary())
                            .output(match &verdict {
                                GateVerdict::Pass => "all criteria met".to_string(),
                                GateVerdict::Fail { deficiencies } => format_deficiencies(deficiencies),
                            })
                            .next_step(next_step),
                    )?;

                    let deficiencies = verdict.into_deficiencies();
                    let _ = events.send(ControllerEvent::AttemptFinished {
                        phase: phase.id.clone(),
                        attempt: task.attempt,
                        manifest: Some(outcome.manifest.clone()),
                        deficiencies: deficiencies.clone(),
                    });

                    if deficiencies.is_empty() {
                        tracing::info!(phase = %phase.id, retries, attempts, "gate passed");
                        return Ok(ReworkOutcome::Passed {
                            manifest: outcome.manifest,
                            retries,
                            attempts,
                        });
                    }
                    (deficiencies, None)
                }
                Err(err) => {
                    let status = match err {
                        WorkerError::Timeout { .. } => EntryStatus::Timeout,
                        _ => EntryStatus::WorkerError,
                    };
                    tracing::warn!(phase = %phase.id, attempt = task.attempt, error = %err, "dispatch failed");
                    self.audit.append(
                        EntryDraft::dispatch(&phase.id, task.attempt, &worker, status)
                            .task(task.summary())
                            .output(err.to_string())
                            .next_step(retry_step.clone()),
                    )?;

                    let deficiencies: Vec<Deficiency> =
                        phase.criteria.iter().map(|c| Deficiency::missing(c)).collect();
                    let _ = events.send(ControllerEvent::AttemptFinished {
                        phase: phase.id.clone(),
                        attempt: task.attempt,
                        manifest: None,
                        deficiencies: deficiencies.clone(),
                    });
                    (deficiencies, Some(err.to_string()))
                }
            };

            if !will_retry {
                tracing::warn!(
                    phase = %phase.id,
                    retries,
                    deficiencies = %format_deficiencies(&deficiencies),
                    "retry limit reached"
                );
                return Ok(ReworkOutcome::Blocked {
                    deficiencies,
                    retries,
                    attempts,
                });
            }

            retries += 1;
            let _ = events.send(ControllerEvent::RetryRecorded {
                phase: phase.id.clone(),
                retries,
            });
            task = task.rework(deficiencies.clone(), failure);
            last_deficiencies = deficiencies;
        }
    }
}

fn describe_delivery(manifest: &Manifest, summary: &str) -> String {
    let counted = format!("{} deliverable(s)", manifest.len());
    if summary.trim().is_empty() {
        counted
    } else {
        format!("{counted}: {}", crate::util::truncate(summary.trim(), 200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{EntryKind, LogSink};
    use crate::deliverable::{Deliverable, MemoryDeliverableStore};
    use crate::dispatch::{Worker, WorkerBinding, WorkerOutput, WorkerRegistry};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Replays one scripted response per attempt.
    struct Scripted {
        responses: Mutex<VecDeque<Result<Vec<Deliverable>, WorkerError>>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Vec<Deliverable>, WorkerError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl Worker for Scripted {
        fn identity(&self) -> String {
            "scripted".to_string()
        }

        async fn invoke(&self, _phase: &Phase, _task: &Task) -> Result<WorkerOutput, WorkerError> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(WorkerError::Other("script exhausted".into())));
            next.map(|deliverables| WorkerOutput {
                deliverables,
                summary: String::new(),
            })
        }
    }

    fn controller(
        responses: Vec<Result<Vec<Deliverable>, WorkerError>>,
        max_retries: u32,
    ) -> (ReworkController, Arc<AuditLog>) {
        let registry = WorkerRegistry::new()
            .with_fallback(WorkerBinding::InProcess(Arc::new(Scripted::new(responses))));
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(MemoryDeliverableStore::new()),
            Duration::from_secs(5),
        );
        let audit = Arc::new(AuditLog::in_memory());
        (
            ReworkController::new(Arc::new(dispatcher), audit.clone(), max_retries),
            audit,
        )
    }

    fn lessons() -> Phase {
        Phase::new("03", "Lesson scripts", &["lesson-script", "slide-outline"])
            .parallel_with("04", &["lesson-script"])
    }

    fn partial(attempt: u32) -> Vec<Deliverable> {
        vec![Deliverable::complete("lesson-script", &format!("ls-{attempt}"))]
    }

    fn full(attempt: u32) -> Vec<Deliverable> {
        vec![
            Deliverable::complete("lesson-script", &format!("ls-{attempt}")),
            Deliverable::complete("slide-outline", &format!("so-{attempt}")),
        ]
    }

    async fn run(
        ctl: &ReworkController,
        phase: &Phase,
        retries: u32,
        halt: &HaltSignal,
    ) -> (ReworkOutcome, Vec<ControllerEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = ctl
            .execute(phase, Task::new(phase, vec![]), retries, halt, &tx)
            .await
            .unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (outcome, events)
    }

    #[tokio::test]
    async fn test_passes_first_attempt() {
        let (ctl, audit) = controller(vec![Ok(full(1))], 3);
        let (outcome, _) = run(&ctl, &lessons(), 0, &HaltSignal::new()).await;
        assert!(matches!(outcome, ReworkOutcome::Passed { retries: 0, attempts: 1, .. }));
        let entries = audit.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::Dispatch);
        assert_eq!(entries[1].status, EntryStatus::Pass);
    }

    #[tokio::test]
    async fn test_passes_after_two_failures() {
        let (ctl, audit) = controller(vec![Ok(partial(1)), Ok(vec![]), Ok(full(3))], 3);
        let (outcome, events) = run(&ctl, &lessons(), 0, &HaltSignal::new()).await;
        assert!(matches!(outcome, ReworkOutcome::Passed { retries: 2, attempts: 3, .. }));
        assert_eq!(audit.dispatch_count(Some("03")), 3);

        let retries: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::RetryRecorded { retries, .. } => Some(*retries),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![1, 2]);

        let gate_steps: Vec<String> = audit
            .entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::Gate)
            .map(|e| e.next_step)
            .collect();
        assert_eq!(gate_steps, vec!["retry 1/3", "retry 2/3", "complete phase"]);
    }

    #[tokio::test]
    async fn test_blocks_after_exhausting_retries() {
        let (ctl, audit) = controller(
            vec![Ok(vec![]), Ok(vec![]), Ok(vec![]), Ok(vec![]), Ok(full(5))],
            3,
        );
        let (outcome, _) = run(&ctl, &lessons(), 0, &HaltSignal::new()).await;
        match outcome {
            ReworkOutcome::Blocked {
                deficiencies,
                retries,
                attempts,
            } => {
                assert_eq!(retries, 3);
                assert_eq!(attempts, 4);
                assert_eq!(deficiencies.len(), 2);
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
        assert_eq!(audit.dispatch_count(None), 4, "no fifth attempt");
        let last = audit.entries().unwrap().pop().unwrap();
        assert_eq!(last.next_step, "block phase");
    }

    #[tokio::test]
    async fn test_dispatch_failure_counts_as_failed_gate() {
        let (ctl, audit) = controller(
            vec![
                Err(WorkerError::Timeout {
                    after: Duration::from_secs(1),
                }),
                Ok(full(2)),
            ],
            3,
        );
        let (outcome, events) = run(&ctl, &lessons(), 0, &HaltSignal::new()).await;
        assert!(matches!(outcome, ReworkOutcome::Passed { retries: 1, .. }));

        let entries = audit.entries().unwrap();
        assert_eq!(entries[0].status, EntryStatus::Timeout);
        assert_eq!(entries[0].next_step, "retry 1/3");
        assert_eq!(entries[1].kind, EntryKind::Dispatch);
        assert!(events.iter().any(|e| matches!(
            e,
            ControllerEvent::AttemptFinished { manifest: None, deficiencies, .. } if deficiencies.len() == 2
        )));
    }

    #[tokio::test]
    async fn test_threshold_reported_once_with_frozen_subset() {
        let mut first = partial(1);
        first.push(Deliverable::draft("slide-outline", "so-1"));
        let (ctl, _) = controller(vec![Ok(first), Ok(full(2))], 3);
        let (_, events) = run(&ctl, &lessons(), 0, &HaltSignal::new()).await;

        let reached: Vec<&Manifest> = events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::ThresholdReached { deliverables, .. } => Some(deliverables),
                _ => None,
            })
            .collect();
        assert_eq!(reached.len(), 1);
        assert_eq!(reached[0].len(), 1);
        assert_eq!(reached[0].as_slice()[0].id, "ls-1");
    }

    #[tokio::test]
    async fn test_resumed_loop_continues_attempt_numbering() {
        let (ctl, audit) = controller(vec![Ok(full(3))], 3);
        let (outcome, _) = run(&ctl, &lessons(), 2, &HaltSignal::new()).await;
        assert!(matches!(outcome, ReworkOutcome::Passed { retries: 2, attempts: 1, .. }));
        assert_eq!(audit.entries().unwrap()[0].attempt, 3);
    }

    #[tokio::test]
    async fn test_raised_halt_stops_before_dispatch() {
        let (ctl, audit) = controller(vec![Ok(full(1))], 3);
        let halt = HaltSignal::new();
        halt.raise();
        let (outcome, _) = run(&ctl, &lessons(), 1, &halt).await;
        assert!(matches!(outcome, ReworkOutcome::Halted { retries: 1, .. }));
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn test_log_failure_ends_loop() {
        struct Broken;
        impl LogSink for Broken {
            fn append_line(&mut self, _line: &str) -> std::io::Result<()> {
                Err(std::io::Error::other("read-only filesystem"))
            }
        }

        let registry = WorkerRegistry::new().with_fallback(WorkerBinding::InProcess(Arc::new(
            Scripted::new(vec![Ok(full(1))]),
        )));
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(MemoryDeliverableStore::new()),
            Duration::from_secs(5),
        );
        let ctl = ReworkController::new(
            Arc::new(dispatcher),
            Arc::new(AuditLog::with_sink(Box::new(Broken))),
            3,
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let phase = lessons();
        let result = ctl
            .execute(&phase, Task::new(&phase, vec![]), 0, &HaltSignal::new(), &tx)
            .await;
        assert!(matches!(result, Err(AuditError::Write(_))));
    }
}
