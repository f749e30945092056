use super::{EntryDraft, EntryKind, LogEntry};
use crate::errors::AuditError;
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable destination for serialized entries, one JSON object per line.
pub trait LogSink: Send {
    /// Write one line and make it durable before returning.
    fn append_line(&mut self, line: &str) -> std::io::Result<()>;
}

/// Appends JSON lines to a file and syncs after every entry.
pub struct FileSink {
    file: fs::File,
}

impl FileSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl LogSink for FileSink {
    fn append_line(&mut self, line: &str) -> std::io::Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        self.file.sync_data()
    }
}

/// Keeps entries in memory only.
pub struct MemorySink;

impl LogSink for MemorySink {
    fn append_line(&mut self, _line: &str) -> std::io::Result<()> {
        Ok(())
    }
}

struct Inner {
    sink: Box<dyn LogSink>,
    entries: Vec<LogEntry>,
}

/// Append-only, totally ordered audit log.
///
/// Appends are serialized by a mutex held across sequence assignment,
/// timestamping and the durable write, so concurrent writers (the two loops
/// of a parallel pair) never interleave and ordering always matches
/// timestamps. An entry becomes visible only after its write succeeded.
/// There is no API to edit or remove an entry.
pub struct AuditLog {
    inner: Mutex<Inner>,
}

impl AuditLog {
    pub fn with_sink(sink: Box<dyn LogSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sink,
                entries: Vec::new(),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::with_sink(Box::new(MemorySink))
    }

    /// Open the log file at `path`, loading existing entries so a resumed run
    /// continues the same history.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let entries = Self::read(path)?;
        let sink = FileSink::open(path).map_err(AuditError::Write)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                sink: Box::new(sink),
                entries,
            }),
        })
    }

    /// Read the entries stored at `path` without opening it for writing.
    pub fn read(path: &Path) -> Result<Vec<LogEntry>, AuditError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path).map_err(|e| AuditError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| AuditError::Read {
                    path: path.to_path_buf(),
                    message: format!("line {}: {}", i + 1, e),
                })
            })
            .collect()
    }

    /// Append an entry. The returned entry is exactly what was written.
    pub fn append(&self, draft: EntryDraft) -> Result<LogEntry, AuditError> {
        let mut inner = self.inner.lock().map_err(|_| AuditError::LockPoisoned)?;

        let now = Utc::now();
        let timestamp = match inner.entries.last() {
            Some(last) if now <= last.timestamp => {
                last.timestamp + chrono::Duration::microseconds(1)
            }
            _ => now,
        };

        let entry = LogEntry {
            seq: inner.entries.len() as u64 + 1,
            timestamp,
            phase: draft.phase,
            kind: draft.kind,
            attempt: draft.attempt,
            worker: draft.worker,
            task: draft.task,
            output: draft.output,
            next_step: draft.next_step,
            status: draft.status,
        };

        let line = serde_json::to_string(&entry)?;
        inner.sink.append_line(&line).map_err(AuditError::Write)?;
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    /// Full ordered history.
    pub fn entries(&self) -> Result<Vec<LogEntry>, AuditError> {
        let inner = self.inner.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(inner.entries.clone())
    }

    /// Entries for one phase, in log order.
    pub fn entries_for(&self, phase: &str) -> Result<Vec<LogEntry>, AuditError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.phase == phase)
            .collect())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of dispatch attempts recorded, optionally for a single phase.
    pub fn dispatch_count(&self, phase: Option<&str>) -> usize {
        self.inner
            .lock()
            .map(|i| {
                i.entries
                    .iter()
                    .filter(|e| e.kind == EntryKind::Dispatch)
                    .filter(|e| phase.is_none_or(|p| e.phase == p))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Pretty JSON array of the full history.
    pub fn export_json(&self) -> Result<String, AuditError> {
        Ok(serde_json::to_string_pretty(&self.entries()?)?)
    }
}

/// Move the log at `path` into `runs_dir`, named after the run it belonged
/// to. Returns the archived path, or `None` if there was no log.
pub fn archive(path: &Path, runs_dir: &Path, run_id: &str) -> std::io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::create_dir_all(runs_dir)?;
    let filename = format!(
        "{}_{}.jsonl",
        Utc::now().format("%Y-%m-%dT%H-%M-%S"),
        &run_id[..run_id.len().min(8)]
    );
    let target = runs_dir.join(filename);
    fs::rename(path, &target)?;
    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EntryStatus;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FailingSink;

    impl LogSink for FailingSink {
        fn append_line(&mut self, _line: &str) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    fn dispatch(phase: &str, attempt: u32) -> EntryDraft {
        EntryDraft::dispatch(phase, attempt, "test-worker", EntryStatus::Delivered)
            .task("task")
            .output("2 deliverables")
            .next_step("evaluate gate")
    }

    #[test]
    fn test_append_assigns_sequence_and_strictly_increasing_timestamps() {
        let log = AuditLog::in_memory();
        for i in 0..50 {
            log.append(dispatch("01", i + 1)).unwrap();
        }
        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 50);
        for (i, pair) in entries.windows(2).enumerate() {
            assert!(
                pair[0].timestamp < pair[1].timestamp,
                "entry {} not strictly before entry {}",
                i + 1,
                i + 2
            );
            assert_eq!(pair[1].seq, pair[0].seq + 1);
        }
        assert_eq!(entries[0].seq, 1);
    }

    #[test]
    fn test_failed_write_is_not_recorded() {
        let log = AuditLog::with_sink(Box::new(FailingSink));
        let result = log.append(dispatch("01", 1));
        assert!(matches!(result, Err(AuditError::Write(_))));
        assert!(log.is_empty(), "an entry that failed to write must not be visible");
    }

    #[test]
    fn test_entries_are_snapshots() {
        let log = AuditLog::in_memory();
        log.append(dispatch("01", 1)).unwrap();
        let mut snapshot = log.entries().unwrap();
        snapshot[0].status = EntryStatus::Fail;
        snapshot.clear();
        let fresh = log.entries().unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].status, EntryStatus::Delivered);
    }

    #[test]
    fn test_file_log_persists_and_resumes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::open(&path).unwrap();
            log.append(dispatch("01", 1)).unwrap();
            log.append(EntryDraft::gate("01", 1, "test-worker", EntryStatus::Pass))
                .unwrap();
        }

        let reopened = AuditLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        let entry = reopened.append(dispatch("02", 1)).unwrap();
        assert_eq!(entry.seq, 3);

        let on_disk = AuditLog::read(&path).unwrap();
        assert_eq!(on_disk.len(), 3);
        assert_eq!(on_disk[2].phase, "02");
        assert!(on_disk[1].timestamp < on_disk[2].timestamp);
    }

    #[test]
    fn test_read_reports_corrupt_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        fs::write(&path, "not json\n").unwrap();
        let err = AuditLog::read(&path).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_concurrent_appends_are_serialized() {
        let log = Arc::new(AuditLog::in_memory());
        let handles: Vec<_> = ["03", "04"]
            .into_iter()
            .map(|phase| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        log.append(dispatch(phase, i + 1)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 200);
        assert!(entries.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(log.dispatch_count(Some("03")), 100);
        assert_eq!(log.dispatch_count(None), 200);
        // Per-phase order is preserved
        let attempts: Vec<u32> = log
            .entries_for("04")
            .unwrap()
            .iter()
            .map(|e| e.attempt)
            .collect();
        assert_eq!(attempts, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn test_export_json_is_ordered_array() {
        let log = AuditLog::in_memory();
        log.append(dispatch("01", 1)).unwrap();
        log.append(dispatch("02", 1)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&log.export_json().unwrap()).unwrap();
        let arr = value.as_array().expect("export must be a JSON array");
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["phase"], "01");
        assert_eq!(arr[1]["seq"], 2);
        for field in ["timestamp", "worker", "task", "output", "next_step", "status"] {
            assert!(arr[0].get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn test_archive_moves_log_into_runs_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let runs = dir.path().join("runs");
        assert!(archive(&path, &runs, "abcdef123456").unwrap().is_none());

        fs::write(&path, "").unwrap();
        let archived = archive(&path, &runs, "abcdef123456").unwrap().unwrap();
        assert!(archived.exists());
        assert!(!path.exists());
        assert!(archived.to_string_lossy().contains("abcdef12"));
    }
}
