//! Drift audit behind `scaffold status`.
//!
//! Compares the chronicle against disk without compiling the blueprint.
//!
//! Signal precedence:
//! 1. `NeverSynced` (chronicle missing, empty or corrupt)
//! 2. `Stale` (tracked paths missing, or blueprint edited after the last run)
//! 3. `Modified` (tracked files whose bytes changed since the last run)
//! 4. `Current`

use std::collections::BTreeSet;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chronicle::{self, LoadState, Provenance};
use crate::error::SyncError;
use crate::snapshot::{self, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum DriftSignal {
    NeverSynced,
    Current,
    Stale { reason: String },
    Modified { files: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub chronicle: LoadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<Provenance>,
    /// Compact age of the last run, e.g. `"5m"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    pub tracked: usize,
    pub missing: Vec<String>,
    pub modified: Vec<String>,
    pub signal: DriftSignal,
}

/// Audit the project under `root`. Nothing is written.
pub fn check(
    root: &Path,
    blueprint: &Path,
    workers: usize,
    max_preview_bytes: u64,
) -> Result<AuditReport, SyncError> {
    let (chronicle, state) = chronicle::peek_at(root)?;
    let last_run = chronicle.provenance.clone();
    let age = last_run.as_ref().map(|p| format_datetime_age(p.timestamp_utc));

    let tracked: BTreeSet<String> = chronicle.manifest.keys().cloned().collect();
    let present: Snapshot = if tracked.is_empty() {
        Snapshot::new()
    } else {
        let pool = snapshot::build_pool(workers)?;
        snapshot::scan(root, &tracked, &pool, max_preview_bytes)?
    };

    let mut missing = Vec::new();
    let mut modified = Vec::new();
    for (path, entry) in &chronicle.manifest {
        let Some(fact) = present.get(path).filter(|f| f.exists) else {
            missing.push(path.clone());
            continue;
        };
        if fact.is_dir != entry.is_dir || (!entry.is_dir && fact.hash != entry.sha256) {
            modified.push(path.clone());
        }
    }

    let signal = if !matches!(state, LoadState::Loaded) || chronicle.manifest.is_empty() {
        DriftSignal::NeverSynced
    } else if !missing.is_empty() {
        DriftSignal::Stale {
            reason: format!(
                "missing {} tracked path(s): {}",
                missing.len(),
                preview_files(&missing)
            ),
        }
    } else if let Some(edited) = blueprint_edited_since(blueprint, last_run.as_ref()) {
        DriftSignal::Stale {
            reason: format!("blueprint changed {} ago", format_system_time_age(edited)),
        }
    } else if !modified.is_empty() {
        DriftSignal::Modified {
            files: modified.clone(),
        }
    } else {
        DriftSignal::Current
    };

    Ok(AuditReport {
        chronicle: state,
        last_run,
        age,
        tracked: tracked.len(),
        missing,
        modified,
        signal,
    })
}

/// Blueprint mtime, if it is newer than the last committed run.
fn blueprint_edited_since(blueprint: &Path, last_run: Option<&Provenance>) -> Option<SystemTime> {
    let last_run = last_run?;
    let modified = std::fs::metadata(blueprint).and_then(|m| m.modified()).ok()?;
    (DateTime::<Utc>::from(modified) > last_run.timestamp_utc).then_some(modified)
}

/// Format age from a filesystem timestamp.
pub fn format_system_time_age(timestamp: SystemTime) -> String {
    let age = SystemTime::now()
        .duration_since(timestamp)
        .unwrap_or_default();
    format_seconds(age.as_secs())
}

/// Format age from a chrono timestamp (chronicle provenance).
pub fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

fn preview_files(paths: &[String]) -> String {
    let mut shown: Vec<String> = paths.iter().take(3).cloned().collect();
    if paths.len() > shown.len() {
        shown.push(format!("+{} more", paths.len() - shown.len()));
    }
    shown.join(", ")
}
