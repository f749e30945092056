//! Single-coordinator guard.
//!
//! State-mutating commands hold an exclusive advisory lock on
//! `.stagehand/run.lock` for their whole duration, so two coordinators never
//! drive the same workflow state.

use anyhow::{Context, Result, bail};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Held for as long as the value lives; the lock is released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock or fail immediately if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                let holder = std::fs::read_to_string(path).unwrap_or_default();
                bail!(
                    "Another stagehand process is running in this project{}",
                    if holder.trim().is_empty() {
                        String::new()
                    } else {
                        format!(" (pid {})", holder.trim())
                    }
                );
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to lock {}", path.display()));
            }
        }

        file.set_len(0).context("Failed to truncate lock file")?;
        write!(file, "{}", std::process::id()).context("Failed to write lock file")?;
        tracing::debug!(path = %path.display(), "run lock acquired");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let first = RunLock::acquire(&path).unwrap();
        let second = RunLock::acquire(&path);
        assert!(second.is_err());
        assert!(
            second
                .unwrap_err()
                .to_string()
                .contains("Another stagehand process")
        );

        drop(first);
        assert!(RunLock::acquire(&path).is_ok(), "lock must be free after drop");
    }

    #[test]
    fn test_lock_file_records_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("run.lock");
        let lock = RunLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
    }
}
