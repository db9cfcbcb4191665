//! Transactional materializer: applies a reconciliation plan to disk.
//!
//! ## Order of operations
//!
//! 1. Moves (renames; destination parents are created).
//! 2. Directory creates, shallowest first.
//! 3. File creates and updates.
//! 4. File deletes.
//! 5. Directory removals, deepest first. Only empty directories are removed.
//!
//! ## `atomic_write`
//!
//! 1. Ensure the parent directory exists.
//! 2. Write to `<path>.scaffold.tmp`.
//! 3. Rename to the final path (atomic on POSIX); on failure remove the tmp.
//! 4. Apply permission bits.
//!
//! Failures are recorded per path and never stop the remaining writes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use scaffold_core::paths::TMP_SUFFIX;
use scaffold_core::types::{Permissions, Severity};

use crate::digest::sha256_hex;
use crate::error::{io_err, SyncError};
use crate::intent::Intents;
use crate::oracle::ReconciliationPlan;

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteAction {
    Created,
    Updated,
    Deleted,
    Moved { from: String },
    DirCreated,
    DirRemoved,
}

/// Outcome of an individual filesystem operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    pub path: String,
    pub action: WriteAction,
    /// Hash of the bytes now at `path`; files only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub bytes: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Dry-run: nothing was touched.
    pub simulated: bool,
}

impl WriteResult {
    fn ok(path: &str, action: WriteAction, hash: Option<String>, bytes: u64, simulated: bool) -> Self {
        Self {
            path: path.to_string(),
            action,
            hash,
            bytes,
            success: true,
            error: None,
            severity: None,
            simulated,
        }
    }

    fn failed(path: &str, action: WriteAction, severity: Severity, error: impl ToString) -> Self {
        Self {
            path: path.to_string(),
            action,
            hash: None,
            bytes: 0,
            success: false,
            error: Some(error.to_string()),
            severity: Some(severity),
            simulated: false,
        }
    }

    /// A failure at or above `threshold`.
    pub fn blocks_at(&self, threshold: Severity) -> bool {
        !self.success && self.severity.is_some_and(|s| s >= threshold)
    }
}

// ---------------------------------------------------------------------------
// atomic_write
// ---------------------------------------------------------------------------

/// Sibling temp path used while writing `path`.
pub fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}{TMP_SUFFIX}", path.display()))
}

pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), SyncError> {
    atomic_write_with_tmp(path, data, &tmp_path(path))
}

fn atomic_write_with_tmp(path: &Path, data: &[u8], tmp: &Path) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        std::fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    std::fs::write(tmp, data).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

#[cfg(unix)]
fn apply_permissions(path: &Path, permissions: Option<Permissions>) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    let Some(permissions) = permissions else {
        return Ok(());
    };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(permissions.mode()))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn apply_permissions(_path: &Path, _permissions: Option<Permissions>) -> Result<(), SyncError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// materialize
// ---------------------------------------------------------------------------

/// Apply `plan` under `root`. With `simulate`, report what would happen and
/// touch nothing.
pub fn materialize(
    root: &Path,
    plan: &ReconciliationPlan,
    intents: &Intents,
    simulate: bool,
) -> Vec<WriteResult> {
    let mut results = Vec::new();

    for mv in &plan.moves {
        let action = WriteAction::Moved {
            from: mv.from.clone(),
        };
        let bytes = intents.get(&mv.to).map_or(0, |i| i.bytes);
        if simulate {
            tracing::info!("[dry-run] would move: {} -> {}", mv.from, mv.to);
            results.push(WriteResult::ok(&mv.to, action, Some(mv.hash.clone()), bytes, true));
            continue;
        }
        let permissions = intents.get(&mv.to).and_then(|i| i.permissions);
        let outcome = rename(root, &mv.from, &mv.to)
            .and_then(|()| apply_permissions(&root.join(&mv.to), permissions));
        results.push(match outcome {
            Ok(()) => {
                tracing::info!("moved: {} -> {}", mv.from, mv.to);
                WriteResult::ok(&mv.to, action, Some(mv.hash.clone()), bytes, false)
            }
            Err(e) => failure(&mv.to, action, Severity::Error, e),
        });
    }

    let mut dirs: Vec<&str> = plan
        .create
        .iter()
        .filter(|c| c.is_dir)
        .map(|c| c.path.as_str())
        .collect();
    dirs.sort_by_key(|p| (depth(p), *p));
    for dir in dirs {
        if simulate {
            tracing::info!("[dry-run] would create dir: {dir}");
            results.push(WriteResult::ok(dir, WriteAction::DirCreated, None, 0, true));
            continue;
        }
        let full = root.join(dir);
        let permissions = intents.get(dir).and_then(|i| i.permissions);
        let outcome = std::fs::create_dir_all(&full)
            .map_err(|e| io_err(&full, e))
            .and_then(|()| apply_permissions(&full, permissions));
        results.push(match outcome {
            Ok(()) => {
                tracing::info!("created dir: {dir}");
                WriteResult::ok(dir, WriteAction::DirCreated, None, 0, false)
            }
            Err(e) => failure(dir, WriteAction::DirCreated, Severity::Error, e),
        });
    }

    let files = plan
        .create
        .iter()
        .filter(|c| !c.is_dir)
        .map(|c| (c.path.as_str(), WriteAction::Created, false))
        .chain(
            plan.update
                .iter()
                .map(|u| (u.path.as_str(), WriteAction::Updated, u.is_mode_only())),
        );
    for (path, action, mode_only) in files {
        let Some(intent) = intents.get(path) else {
            results.push(failure(path, action, Severity::Error, "no intended content"));
            continue;
        };
        if simulate {
            if mode_only {
                tracing::info!("[dry-run] would chmod: {path}");
            } else {
                tracing::info!("[dry-run] would write: {path}");
            }
            results.push(WriteResult::ok(path, action, intent.hash.clone(), intent.bytes, true));
            continue;
        }
        let full = root.join(path);
        let outcome = if mode_only {
            apply_permissions(&full, intent.permissions)
        } else {
            atomic_write(&full, &intent.data)
                .and_then(|()| apply_permissions(&full, intent.permissions))
        };
        results.push(match outcome {
            Ok(()) => {
                if mode_only {
                    tracing::info!("chmod: {path}");
                } else {
                    tracing::info!("wrote: {path}");
                }
                WriteResult::ok(
                    path,
                    action,
                    Some(sha256_hex(&intent.data)),
                    intent.bytes,
                    false,
                )
            }
            Err(e) => failure(path, action, Severity::Error, e),
        });
    }

    for removal in plan.delete.iter().filter(|d| !d.is_dir) {
        let path = removal.path.as_str();
        if simulate {
            tracing::info!("[dry-run] would delete: {path}");
            results.push(WriteResult::ok(path, WriteAction::Deleted, None, 0, true));
            continue;
        }
        let full = root.join(path);
        results.push(match std::fs::remove_file(&full) {
            Ok(()) => {
                tracing::info!("deleted: {path}");
                WriteResult::ok(path, WriteAction::Deleted, None, 0, false)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("already absent: {path}");
                WriteResult::ok(path, WriteAction::Deleted, None, 0, false)
            }
            Err(e) => failure(path, WriteAction::Deleted, Severity::Error, io_err(&full, e)),
        });
    }

    let mut dirs: Vec<&str> = plan
        .delete
        .iter()
        .filter(|d| d.is_dir)
        .map(|d| d.path.as_str())
        .collect();
    dirs.sort_by_key(|p| (std::cmp::Reverse(depth(p)), *p));
    for dir in dirs {
        if simulate {
            tracing::info!("[dry-run] would remove dir: {dir}");
            results.push(WriteResult::ok(dir, WriteAction::DirRemoved, None, 0, true));
            continue;
        }
        results.push(remove_dir(root, dir));
    }

    results
}

fn rename(root: &Path, from: &str, to: &str) -> Result<(), SyncError> {
    let source = root.join(from);
    let target = root.join(to);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::rename(&source, &target).map_err(|e| io_err(&target, e))
}

/// Remove an empty directory; untracked content keeps it alive.
fn remove_dir(root: &Path, dir: &str) -> WriteResult {
    let full = root.join(dir);
    match std::fs::remove_dir(&full) {
        Ok(()) => {
            tracing::info!("removed dir: {dir}");
            WriteResult::ok(dir, WriteAction::DirRemoved, None, 0, false)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            WriteResult::ok(dir, WriteAction::DirRemoved, None, 0, false)
        }
        Err(e) => {
            let non_empty = std::fs::read_dir(&full).is_ok_and(|mut it| it.next().is_some());
            if non_empty {
                tracing::warn!("kept non-empty directory: {dir}");
                WriteResult::failed(
                    dir,
                    WriteAction::DirRemoved,
                    Severity::Warning,
                    format!("directory {dir} is not empty; left in place"),
                )
            } else {
                failure(dir, WriteAction::DirRemoved, Severity::Error, io_err(&full, e))
            }
        }
    }
}

fn failure(path: &str, action: WriteAction, severity: Severity, error: impl ToString) -> WriteResult {
    let result = WriteResult::failed(path, action, severity, error);
    tracing::warn!(
        "failed: {path}: {}",
        result.error.as_deref().unwrap_or_default()
    );
    result
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
