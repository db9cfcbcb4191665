//! Error types for scaffold-sync.

use std::path::PathBuf;

use thiserror::Error;

use scaffold_compiler::CompileError;
use scaffold_core::error::ConfigError;

use crate::oracle::Conflict;

/// All errors that can arise from planning or applying a blueprint.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Chronicle or history JSON could not be (de)serialized.
    #[error("chronicle JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// The blueprint compiled with diagnostics at error level or above.
    #[error("blueprint has {errors} error(s); first: {first}")]
    Blueprint { errors: usize, first: String },

    /// Tracked paths diverged from the chronicle and no override was given.
    #[error("{} conflicting path(s): {}", .0.len(), describe_conflicts(.0))]
    Conflicts(Vec<Conflict>),

    /// Another run holds the project lock.
    #[error("another run holds the lock at {path} ({holder})")]
    Locked { path: PathBuf, holder: String },

    #[error("worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

fn describe_conflicts(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
