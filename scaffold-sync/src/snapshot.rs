//! Present-state scan: one [`DiskFact`] per path, gathered on a bounded pool.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;

use crate::digest::{is_binary, sha256_hex};
use crate::error::{io_err, SyncError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskFact {
    pub exists: bool,
    pub is_dir: bool,
    pub is_symlink: bool,
    /// SHA-256 of the exact bytes; files only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub bytes: u64,
    /// Octal mode such as `"644"`; unix only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    pub is_binary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    /// File text, kept only for small UTF-8 files.
    #[serde(skip)]
    pub text: Option<String>,
}

impl DiskFact {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn is_file(&self) -> bool {
        self.exists && !self.is_dir
    }
}

pub type Snapshot = BTreeMap<String, DiskFact>;

pub fn build_pool(workers: usize) -> Result<ThreadPool, SyncError> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("scaffold-scan-{i}"))
        .build()?)
}

/// Probe every path in parallel. Results are keyed and sorted by path.
pub fn scan(
    root: &Path,
    relative: &BTreeSet<String>,
    pool: &ThreadPool,
    max_preview_bytes: u64,
) -> Result<Snapshot, SyncError> {
    let snapshot = pool.install(|| {
        relative
            .par_iter()
            .map(|path| probe(root, path, max_preview_bytes).map(|fact| (path.clone(), fact)))
            .collect::<Result<Snapshot, SyncError>>()
    })?;
    tracing::debug!("scanned {} path(s) under {}", snapshot.len(), root.display());
    Ok(snapshot)
}

/// Facts for a single path relative to `root`.
pub fn probe(root: &Path, relative: &str, max_preview_bytes: u64) -> Result<DiskFact, SyncError> {
    let full = root.join(relative);
    let link_meta = match std::fs::symlink_metadata(&full) {
        Ok(meta) => meta,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            return Ok(DiskFact::absent())
        }
        Err(e) => return Err(io_err(&full, e)),
    };
    let is_symlink = link_meta.file_type().is_symlink();
    let meta = if is_symlink {
        match std::fs::metadata(&full) {
            Ok(meta) => meta,
            // Dangling link: present, but nothing to hash.
            Err(_) => {
                return Ok(DiskFact {
                    exists: true,
                    is_symlink: true,
                    ..DiskFact::default()
                })
            }
        }
    } else {
        link_meta
    };

    let mut fact = DiskFact {
        exists: true,
        is_dir: meta.is_dir(),
        is_symlink,
        permissions: mode_string(&meta),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
        ..DiskFact::default()
    };
    if fact.is_dir {
        return Ok(fact);
    }

    let data = std::fs::read(&full).map_err(|e| io_err(&full, e))?;
    fact.hash = Some(sha256_hex(&data));
    fact.bytes = data.len() as u64;
    fact.is_binary = is_binary(&data);
    if !fact.is_binary && fact.bytes <= max_preview_bytes {
        fact.text = String::from_utf8(data).ok();
    }
    Ok(fact)
}

#[cfg(unix)]
fn mode_string(meta: &std::fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:03o}", meta.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn mode_string(_meta: &std::fs::Metadata) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn probe_reports_files_dirs_and_absence() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/main.py"), "print(1)").unwrap();

        let dir = probe(tmp.path(), "src", 1024).unwrap();
        assert!(dir.exists && dir.is_dir && dir.hash.is_none());

        let file = probe(tmp.path(), "src/main.py", 1024).unwrap();
        assert_eq!(file.hash.as_deref(), Some(sha256_hex(b"print(1)").as_str()));
        assert_eq!(file.bytes, 8);
        assert_eq!(file.text.as_deref(), Some("print(1)"));

        assert_eq!(probe(tmp.path(), "nope.txt", 1024).unwrap(), DiskFact::absent());
        assert_eq!(
            probe(tmp.path(), "src/main.py/inner", 1024).unwrap(),
            DiskFact::absent()
        );
    }

    #[test]
    fn large_and_binary_files_keep_no_text() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("big.txt"), "x".repeat(64)).unwrap();
        std::fs::write(tmp.path().join("blob.bin"), [0u8, 1, 2, 3]).unwrap();

        let big = probe(tmp.path(), "big.txt", 16).unwrap();
        assert!(big.hash.is_some());
        assert!(big.text.is_none());

        let blob = probe(tmp.path(), "blob.bin", 1024).unwrap();
        assert!(blob.is_binary);
        assert!(blob.text.is_none());
    }

    #[test]
    fn parallel_scan_is_keyed_by_path() {
        let tmp = TempDir::new().unwrap();
        let mut wanted = BTreeSet::new();
        for i in 0..20 {
            let name = format!("f{i:02}.txt");
            std::fs::write(tmp.path().join(&name), format!("{i}")).unwrap();
            wanted.insert(name);
        }
        wanted.insert("missing.txt".to_string());

        let pool = build_pool(4).unwrap();
        let snapshot = scan(tmp.path(), &wanted, &pool, 1024).unwrap();
        assert_eq!(snapshot.len(), 21);
        assert!(!snapshot["missing.txt"].exists);
        assert_eq!(snapshot["f07.txt"].text.as_deref(), Some("7"));
    }

    #[test]
    #[cfg(unix)]
    fn permissions_are_octal_strings() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.sh");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let fact = probe(tmp.path(), "run.sh", 1024).unwrap();
        assert_eq!(fact.permissions.as_deref(), Some("755"));
    }
}
