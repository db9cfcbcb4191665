//! Chronicle: the durable record of what the last committed run put on disk.
//!
//! Persists a [`Chronicle`] JSON document at `<root>/scaffold.lock`. Writes
//! use the `.tmp` + rename pattern so a crash never leaves a torn file.
//!
//! The manifest is sealed with a SHA-256 over its canonical JSON (sorted
//! keys, compact). A document that fails to parse, carries an unknown
//! version, or whose seal does not match is copied aside and replaced by an
//! empty history.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scaffold_core::paths;

use crate::digest::sha256_hex;
use crate::error::{io_err, SyncError};
use crate::intent::{Intent, Intents};
use crate::materializer::{WriteAction, WriteResult};
use crate::oracle::{ReconciliationPlan, Summary};

pub const CHRONICLE_VERSION: u32 = 1;

/// One tracked path. Directories carry no hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
    /// Blueprint line that last produced this path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl ManifestEntry {
    pub fn dir(line: Option<usize>) -> Self {
        Self {
            is_dir: true,
            line,
            ..Self::default()
        }
    }
}

/// Relative path → entry, sorted so serialization is canonical.
pub type Manifest = BTreeMap<String, ManifestEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub run_id: Uuid,
    pub timestamp_utc: DateTime<Utc>,
    pub blueprint: String,
    pub tool_version: String,
    pub counts: Summary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chronicle {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    pub manifest: Manifest,
    pub seal: String,
}

impl Default for Chronicle {
    fn default() -> Self {
        Self {
            version: CHRONICLE_VERSION,
            provenance: None,
            manifest: Manifest::new(),
            seal: String::new(),
        }
    }
}

impl Chronicle {
    /// Build a chronicle with a freshly computed seal.
    pub fn sealed(manifest: Manifest, provenance: Provenance) -> Result<Self, SyncError> {
        let seal = seal(&manifest)?;
        Ok(Self {
            version: CHRONICLE_VERSION,
            provenance: Some(provenance),
            manifest,
            seal,
        })
    }
}

/// How the chronicle on disk was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    /// No chronicle yet; first run.
    Missing,
    Loaded,
    /// The file is unusable; history reads as empty. Not yet backed up.
    Corrupt { reason: String },
    /// The file was unusable; it was copied to `backup` and history reset.
    Recovered { backup: PathBuf, reason: String },
}

/// Integrity seal over the manifest's canonical JSON.
pub fn seal(manifest: &Manifest) -> Result<String, SyncError> {
    let canonical = serde_json::to_vec(manifest)?;
    Ok(sha256_hex(&canonical))
}

/// Load the chronicle under `root`.
///
/// Returns an empty chronicle if the file does not yet exist, or if it is
/// corrupt (after backing it up).
pub fn load_at(root: &Path) -> Result<(Chronicle, LoadState), SyncError> {
    match peek_at(root)? {
        (chronicle, LoadState::Corrupt { reason }) => {
            let backup = back_up_at(root, &reason)?;
            Ok((chronicle, LoadState::Recovered { backup, reason }))
        }
        loaded => Ok(loaded),
    }
}

/// Read-only variant of [`load_at`]: a corrupt chronicle is reported as
/// [`LoadState::Corrupt`] and left where it is.
pub fn peek_at(root: &Path) -> Result<(Chronicle, LoadState), SyncError> {
    let path = paths::chronicle_path(root);
    if !path.exists() {
        return Ok((Chronicle::default(), LoadState::Missing));
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;

    let reason = match serde_json::from_str::<Chronicle>(&contents) {
        Err(e) => format!("unparseable: {e}"),
        Ok(chronicle) if chronicle.version != CHRONICLE_VERSION => {
            format!("unsupported version {}", chronicle.version)
        }
        Ok(chronicle) => {
            if seal(&chronicle.manifest)? == chronicle.seal {
                tracing::debug!(
                    "loaded chronicle with {} entries",
                    chronicle.manifest.len()
                );
                return Ok((chronicle, LoadState::Loaded));
            }
            "seal mismatch".to_string()
        }
    };
    Ok((Chronicle::default(), LoadState::Corrupt { reason }))
}

/// Copy an unusable chronicle to `scaffold.lock.corrupt-<timestamp>`.
pub fn back_up_at(root: &Path, reason: &str) -> Result<PathBuf, SyncError> {
    let path = paths::chronicle_path(root);
    let backup = backup_path(&path, Utc::now());
    std::fs::copy(&path, &backup).map_err(|e| io_err(&backup, e))?;
    tracing::warn!(
        "chronicle at {} is corrupt ({reason}); backed up to {} and starting from empty history",
        path.display(),
        backup.display()
    );
    Ok(backup)
}

/// Save the chronicle atomically.
///
/// Writes to `scaffold.lock.tmp` then renames to `scaffold.lock`.
pub fn save_at(root: &Path, chronicle: &Chronicle) -> Result<PathBuf, SyncError> {
    let path = paths::chronicle_path(root);
    std::fs::create_dir_all(root).map_err(|e| io_err(root, e))?;

    let json = serde_json::to_string_pretty(chronicle)?;
    let tmp = path.with_extension("lock.tmp");
    std::fs::write(&tmp, format!("{json}\n")).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    tracing::info!(
        "chronicle committed: {} entries at {}",
        chronicle.manifest.len(),
        path.display()
    );
    Ok(path)
}

// ---------------------------------------------------------------------------
// Federation
// ---------------------------------------------------------------------------

/// Merge the previous manifest with the outcome of a run.
///
/// Untouched and failed paths keep their previous entry. Successful writes
/// and unchanged paths take the intended state; deletes and move origins
/// drop out. A directory left in place because it still holds untracked
/// content is no longer tracked either.
pub fn federate(
    past: &Manifest,
    plan: &ReconciliationPlan,
    intents: &Intents,
    writes: &[WriteResult],
) -> Manifest {
    let mut manifest = past.clone();

    for path in &plan.unchanged {
        if let Some(intent) = intents.get(path) {
            manifest.insert(path.clone(), entry_for(intent));
        }
    }

    for write in writes.iter().filter(|w| !w.simulated) {
        if !write.success {
            if write.action == WriteAction::DirRemoved {
                manifest.remove(&write.path);
            }
            continue;
        }
        match &write.action {
            WriteAction::Deleted | WriteAction::DirRemoved => {
                manifest.remove(&write.path);
            }
            WriteAction::Moved { from } => {
                manifest.remove(from);
                if let Some(intent) = intents.get(&write.path) {
                    manifest.insert(write.path.clone(), entry_for(intent));
                }
            }
            WriteAction::Created | WriteAction::Updated | WriteAction::DirCreated => {
                if let Some(intent) = intents.get(&write.path) {
                    let mut entry = entry_for(intent);
                    if write.hash.is_some() {
                        entry.sha256 = write.hash.clone();
                    }
                    manifest.insert(write.path.clone(), entry);
                }
            }
        }
    }
    manifest
}

fn entry_for(intent: &Intent) -> ManifestEntry {
    if intent.is_dir {
        let mut entry = ManifestEntry::dir(Some(intent.line));
        entry.permissions = intent.permissions.map(|p| p.to_string());
        return entry;
    }
    ManifestEntry {
        sha256: intent.hash.clone(),
        bytes: intent.bytes,
        permissions: intent.permissions.map(|p| p.to_string()),
        is_dir: false,
        line: Some(intent.line),
    }
}

fn backup_path(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| paths::CHRONICLE_FILE.to_string());
    path.with_file_name(format!("{name}.corrupt-{}", at.format("%Y%m%dT%H%M%SZ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_manifest() -> Manifest {
        let mut manifest = Manifest::new();
        manifest.insert("src".to_string(), ManifestEntry::dir(Some(1)));
        manifest.insert(
            "src/main.py".to_string(),
            ManifestEntry {
                sha256: Some(sha256_hex(b"print(1)")),
                bytes: 8,
                permissions: None,
                is_dir: false,
                line: Some(2),
            },
        );
        manifest
    }

    fn provenance() -> Provenance {
        Provenance {
            run_id: Uuid::new_v4(),
            timestamp_utc: Utc::now(),
            blueprint: "blueprint.scaffold".to_string(),
            tool_version: "test".to_string(),
            counts: Summary::default(),
        }
    }

    #[test]
    fn empty_chronicle_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let (chronicle, state) = load_at(tmp.path()).unwrap();
        assert!(chronicle.manifest.is_empty());
        assert_eq!(state, LoadState::Missing);
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let chronicle = Chronicle::sealed(sample_manifest(), provenance()).unwrap();
        save_at(tmp.path(), &chronicle).unwrap();

        let (loaded, state) = load_at(tmp.path()).unwrap();
        assert_eq!(state, LoadState::Loaded);
        assert_eq!(loaded, chronicle);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let chronicle = Chronicle::sealed(Manifest::new(), provenance()).unwrap();
        let path = save_at(tmp.path(), &chronicle).unwrap();
        assert!(!path.with_extension("lock.tmp").exists());
    }

    #[test]
    fn seal_mismatch_is_recovered_with_backup() {
        let tmp = TempDir::new().unwrap();
        let mut chronicle = Chronicle::sealed(sample_manifest(), provenance()).unwrap();
        chronicle
            .manifest
            .get_mut("src/main.py")
            .unwrap()
            .sha256 = Some("tampered".to_string());
        let path = paths::chronicle_path(tmp.path());
        std::fs::write(&path, serde_json::to_string(&chronicle).unwrap()).unwrap();

        let (loaded, state) = load_at(tmp.path()).unwrap();
        assert!(loaded.manifest.is_empty());
        match state {
            LoadState::Recovered { backup, reason } => {
                assert_eq!(reason, "seal mismatch");
                assert!(backup.exists());
                assert!(backup
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .starts_with("scaffold.lock.corrupt-"));
            }
            other => panic!("expected recovery, got {other:?}"),
        }
        assert!(path.exists(), "original is left in place until the next commit");
    }

    #[test]
    fn garbage_and_future_versions_are_recovered() {
        let tmp = TempDir::new().unwrap();
        let path = paths::chronicle_path(tmp.path());

        std::fs::write(&path, "{ not json").unwrap();
        let (_, state) = load_at(tmp.path()).unwrap();
        assert!(matches!(state, LoadState::Recovered { ref reason, .. } if reason.starts_with("unparseable")));

        let mut chronicle = Chronicle::sealed(Manifest::new(), provenance()).unwrap();
        chronicle.version = 9;
        std::fs::write(&path, serde_json::to_string(&chronicle).unwrap()).unwrap();
        let (_, state) = load_at(tmp.path()).unwrap();
        assert!(matches!(state, LoadState::Recovered { ref reason, .. } if reason.contains("version 9")));
    }

    #[test]
    fn federation_keeps_failed_and_untouched_paths() {
        use crate::oracle::Change;
        use scaffold_core::types::Severity;

        let mut past = sample_manifest();
        past.insert(
            "docs/old.md".to_string(),
            ManifestEntry {
                sha256: Some(sha256_hex(b"old")),
                bytes: 3,
                ..ManifestEntry::default()
            },
        );
        past.insert("legacy".to_string(), ManifestEntry::dir(Some(9)));

        let intent = Intent {
            path: "src/main.py".to_string(),
            is_dir: false,
            data: b"print(2)".to_vec(),
            hash: Some(sha256_hex(b"print(2)")),
            bytes: 8,
            permissions: None,
            seed: None,
            line: 2,
        };
        let intents = Intents::from([("src/main.py".to_string(), intent)]);
        let plan = ReconciliationPlan {
            delete: vec![Change {
                path: "docs/old.md".to_string(),
                is_dir: false,
                hash: None,
            }],
            ..ReconciliationPlan::default()
        };
        let writes = vec![
            WriteResult {
                path: "src/main.py".to_string(),
                action: WriteAction::Updated,
                hash: Some(sha256_hex(b"print(2)")),
                bytes: 8,
                success: true,
                error: None,
                severity: None,
                simulated: false,
            },
            WriteResult {
                path: "docs/old.md".to_string(),
                action: WriteAction::Deleted,
                hash: None,
                bytes: 0,
                success: false,
                error: Some("permission denied".to_string()),
                severity: Some(Severity::Error),
                simulated: false,
            },
            WriteResult {
                path: "legacy".to_string(),
                action: WriteAction::DirRemoved,
                hash: None,
                bytes: 0,
                success: false,
                error: Some("not empty".to_string()),
                severity: Some(Severity::Warning),
                simulated: false,
            },
        ];

        let manifest = federate(&past, &plan, &intents, &writes);
        assert_eq!(
            manifest["src/main.py"].sha256.as_deref(),
            Some(sha256_hex(b"print(2)").as_str())
        );
        assert_eq!(manifest["docs/old.md"], past["docs/old.md"]);
        assert!(manifest.contains_key("src"));
        assert!(!manifest.contains_key("legacy"));
    }

    #[test]
    fn peek_reports_corruption_without_backup() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(paths::chronicle_path(tmp.path()), "[]").unwrap();
        let (chronicle, state) = peek_at(tmp.path()).unwrap();
        assert!(chronicle.manifest.is_empty());
        assert!(matches!(state, LoadState::Corrupt { .. }));
        let entries = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(entries, 1, "peek must not write a backup");
    }

    #[test]
    fn seal_ignores_provenance() {
        let a = Chronicle::sealed(sample_manifest(), provenance()).unwrap();
        let b = Chronicle::sealed(sample_manifest(), provenance()).unwrap();
        assert_eq!(a.seal, b.seal);
        assert_ne!(a.provenance, b.provenance);
    }
}
