use super::{Task, Worker, WorkerOutput};
use crate::errors::WorkerError;
use crate::phase::Phase;
use crate::util::{extract_json_object, tail_lines};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Payload written to a command worker's stdin.
#[derive(Debug, Serialize)]
pub struct WorkerRequest<'a> {
    pub phase: &'a str,
    pub phase_name: &'a str,
    pub criteria: Vec<&'a str>,
    pub task: &'a Task,
}

/// Runs an external program once per attempt.
///
/// The request goes in as JSON on stdin. The program prints a JSON object
/// `{"deliverables": [...], "summary": "..."}` somewhere on stdout and exits 0.
/// The child is killed if the dispatcher's timeout drops the future.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Option<Duration>,
    transcript_dir: Option<PathBuf>,
}

impl CommandWorker {
    pub fn new(
        program: &str,
        args: &[String],
        working_dir: PathBuf,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            working_dir,
            timeout,
            transcript_dir: None,
        }
    }

    /// Keep raw stdout of each attempt under `dir`.
    pub fn with_transcripts(mut self, dir: PathBuf) -> Self {
        self.transcript_dir = Some(dir);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn transcript_path(&self, phase: &str, attempt: u32) -> Option<PathBuf> {
        self.transcript_dir
            .as_ref()
            .map(|dir| dir.join(format!("phase-{}-attempt-{}-output.log", phase, attempt)))
    }
}

#[async_trait]
impl Worker for CommandWorker {
    fn identity(&self) -> String {
        format!("command:{}", self.program)
    }

    async fn invoke(&self, phase: &Phase, task: &Task) -> Result<WorkerOutput, WorkerError> {
        let request = WorkerRequest {
            phase: &phase.id,
            phase_name: &phase.name,
            criteria: phase.criteria.iter().map(String::as_str).collect(),
            task,
        };
        let payload =
            serde_json::to_vec(&request).map_err(|e| WorkerError::Other(e.to_string()))?;

        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("STAGEHAND_PHASE", &phase.id)
            .env("STAGEHAND_ATTEMPT", task.attempt.to_string())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        tracing::debug!(
            program = %self.program,
            pid = child.id().unwrap_or(0),
            phase = %phase.id,
            "worker process spawned"
        );

        if let Some(mut stdin) = child.stdin.take() {
            // A worker that ignores stdin may exit before reading it
            match stdin.write_all(&payload).await {
                Ok(()) => {
                    let _ = stdin.shutdown().await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(WorkerError::Other(format!("failed to write task: {e}"))),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| WorkerError::Other(format!("failed to wait for worker: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        tracing::debug!(
            program = %self.program,
            exit_code = output.status.code().unwrap_or(-1),
            elapsed_secs = start.elapsed().as_secs_f64(),
            stdout_bytes = output.stdout.len(),
            "worker process finished"
        );

        if let Some(path) = self.transcript_path(&phase.id, task.attempt) {
            if let Err(e) = std::fs::write(&path, stdout.as_bytes()) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write transcript");
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkerError::Failed {
                exit_code: output.status.code().unwrap_or(-1),
                message: tail_lines(&stderr, 5),
            });
        }

        parse_worker_output(&stdout)
    }
}

/// Pull the worker's JSON object out of its raw output.
pub fn parse_worker_output(text: &str) -> Result<WorkerOutput, WorkerError> {
    let json = extract_json_object(text)
        .ok_or_else(|| WorkerError::Malformed("no JSON object in worker output".to_string()))?;
    serde_json::from_str(&json).map_err(|e| WorkerError::Malformed(e.to_string()))
}
