//! Per-project run lock at `<root>/.scaffold/run.lock`.
//!
//! The file holds `"<pid> <rfc3339 timestamp>"`. A lock older than
//! [`STALE_AFTER`] is assumed abandoned and broken with a warning.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;

use scaffold_core::paths;

use crate::error::{io_err, SyncError};

pub const STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Held for the duration of an apply; released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(root: &Path) -> Result<Self, SyncError> {
        let path = paths::lock_path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        match create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                if !is_stale(&path) {
                    return Err(SyncError::Locked {
                        path,
                        holder: holder.trim().to_string(),
                    });
                }
                tracing::warn!(
                    "breaking stale run lock at {} (held by {})",
                    path.display(),
                    holder.trim()
                );
                std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                create(&path).map_err(|e| io_err(&path, e))
            }
            Err(e) => Err(io_err(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("could not release run lock {}: {e}", self.path.display());
        }
    }
}

fn create(path: &Path) -> std::io::Result<RunLock> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())?;
    tracing::debug!("acquired run lock {}", path.display());
    Ok(RunLock {
        path: path.to_path_buf(),
    })
}

fn is_stale(path: &Path) -> bool {
    let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age > STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_until_release() {
        let root = TempDir::new().expect("root");
        let lock = RunLock::acquire(root.path()).expect("first");
        assert!(lock.path().exists());

        let err = RunLock::acquire(root.path()).expect_err("second must fail");
        match err {
            SyncError::Locked { holder, .. } => {
                assert!(holder.starts_with(&std::process::id().to_string()));
            }
            other => panic!("expected Locked, got {other:?}"),
        }

        drop(lock);
        assert!(!paths::lock_path(root.path()).exists());
        RunLock::acquire(root.path()).expect("after release");
    }

    #[test]
    fn stale_lock_is_broken() {
        let root = TempDir::new().expect("root");
        let path = paths::lock_path(root.path());
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "99999 2020-01-01T00:00:00Z\n").expect("write");
        let old = SystemTime::now() - STALE_AFTER - Duration::from_secs(60);
        filetime::set_file_mtime(&path, FileTime::from_system_time(old)).expect("mtime");

        let lock = RunLock::acquire(root.path()).expect("stale lock broken");
        let contents = std::fs::read_to_string(lock.path()).expect("read");
        assert!(contents.starts_with(&std::process::id().to_string()));
    }
}
