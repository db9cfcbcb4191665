//! Intended content: the exact bytes each planned file will hold.
//!
//! Content comes from, in order: a mutation applied over the present file
//! (or its seed, or nothing), the seed file, or the inline content. The hash
//! of these bytes is what reconciliation and the chronicle compare against.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use rayon::prelude::*;
use rayon::ThreadPool;
use regex::RegexBuilder;
use serde::Serialize;

use scaffold_core::types::{MutationOp, Permissions, PlannedEntry};

use crate::digest::{is_binary, sha256_hex};
use crate::snapshot::{DiskFact, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Intent {
    pub path: String,
    pub is_dir: bool,
    #[serde(skip)]
    pub data: Vec<u8>,
    /// `None` for directories.
    pub hash: Option<String>,
    pub bytes: u64,
    pub permissions: Option<Permissions>,
    /// Copy source; move detection prefers it as the origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    pub line: usize,
}

impl Intent {
    pub fn text(&self) -> Option<&str> {
        if is_binary(&self.data) {
            return None;
        }
        std::str::from_utf8(&self.data).ok()
    }
}

/// A planned file whose content could not be computed; it is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentFault {
    pub path: String,
    pub line: usize,
    pub reason: String,
}

pub type Intents = BTreeMap<String, Intent>;

/// Compute intents for every entry on `pool`.
pub fn compute(
    root: &Path,
    entries: &[PlannedEntry],
    present: &Snapshot,
    pool: &ThreadPool,
) -> (Intents, Vec<IntentFault>) {
    let absent = DiskFact::absent();
    let results: Vec<Result<Intent, IntentFault>> = pool.install(|| {
        entries
            .par_iter()
            .map(|entry| {
                let fact = present.get(&entry.path).unwrap_or(&absent);
                resolve_entry(root, entry, fact)
            })
            .collect()
    });

    let mut intents = Intents::new();
    let mut faults = Vec::new();
    for result in results {
        match result {
            Ok(intent) => {
                intents.insert(intent.path.clone(), intent);
            }
            Err(fault) => {
                tracing::warn!("{}: {}", fault.path, fault.reason);
                faults.push(fault);
            }
        }
    }
    (intents, faults)
}

fn resolve_entry(root: &Path, entry: &PlannedEntry, fact: &DiskFact) -> Result<Intent, IntentFault> {
    let fault = |reason: String| IntentFault {
        path: entry.path.clone(),
        line: entry.line,
        reason,
    };

    if entry.is_dir {
        return Ok(Intent {
            path: entry.path.clone(),
            is_dir: true,
            data: Vec::new(),
            hash: None,
            bytes: 0,
            permissions: entry.permissions,
            seed: None,
            line: entry.line,
        });
    }

    let data = if entry.mutation.is_none() {
        match &entry.seed {
            Some(seed) => read_seed(root, seed, &entry.path, fact).map_err(fault)?,
            None => entry.content.clone().unwrap_or_default().into_bytes(),
        }
    } else {
        let base = mutation_base(root, entry, fact).map_err(&fault)?;
        let fragment = entry.content.as_deref().unwrap_or_default();
        mutate(&base, &entry.mutation, fragment)
            .map_err(fault)?
            .into_bytes()
    };

    Ok(Intent {
        path: entry.path.clone(),
        is_dir: false,
        hash: Some(sha256_hex(&data)),
        bytes: data.len() as u64,
        data,
        permissions: entry.permissions,
        seed: entry.seed.clone(),
        line: entry.line,
    })
}

/// Seed bytes; once the seed is gone (e.g. moved onto this path) the
/// present file stands in for it.
fn read_seed(root: &Path, seed: &str, path: &str, fact: &DiskFact) -> Result<Vec<u8>, String> {
    match std::fs::read(root.join(seed)) {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == ErrorKind::NotFound && fact.is_file() => {
            std::fs::read(root.join(path)).map_err(|e| format!("cannot read '{path}': {e}"))
        }
        Err(e) => Err(format!("seed '{seed}' cannot be read: {e}")),
    }
}

fn mutation_base(root: &Path, entry: &PlannedEntry, fact: &DiskFact) -> Result<String, String> {
    let source = if fact.is_file() {
        Some(entry.path.as_str())
    } else {
        entry.seed.as_deref()
    };
    let Some(source) = source else {
        return Ok(String::new());
    };
    if let Some(text) = fact.text.as_ref().filter(|_| source == entry.path) {
        return Ok(text.clone());
    }
    match std::fs::read(root.join(source)) {
        Ok(data) if is_binary(&data) => Err(format!("cannot mutate binary file '{source}'")),
        Ok(data) => String::from_utf8(data).map_err(|_| format!("'{source}' is not UTF-8")),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(format!("cannot read '{source}': {e}")),
    }
}

/// Apply a mutation to `base`. Append and prepend are no-ops when the
/// fragment is already in place, so repeated runs converge.
pub fn mutate(base: &str, op: &MutationOp, fragment: &str) -> Result<String, String> {
    let line = if fragment.ends_with('\n') {
        fragment.to_string()
    } else {
        format!("{fragment}\n")
    };
    match op {
        MutationOp::None => Ok(fragment.to_string()),
        MutationOp::Append => {
            if base.ends_with(&line) {
                return Ok(base.to_string());
            }
            let mut out = base.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&line);
            Ok(out)
        }
        MutationOp::Prepend => {
            if base.starts_with(&line) {
                return Ok(base.to_string());
            }
            Ok(format!("{line}{base}"))
        }
        MutationOp::Subtract => {
            let re = pattern(fragment)?;
            Ok(re.replace_all(base, "").into_owned())
        }
        MutationOp::Rewrite { replacement } => {
            let re = pattern(fragment)?;
            Ok(re.replace_all(base, replacement.as_str()).into_owned())
        }
    }
}

fn pattern(raw: &str) -> Result<regex::Regex, String> {
    RegexBuilder::new(raw)
        .multi_line(true)
        .build()
        .map_err(|e| format!("invalid pattern '{raw}': {e}"))
}

/// Strip a declared virtual root from a path. `None` means the path is the
/// virtual root itself.
pub fn strip_virtual_root(path: &str, virtual_root: Option<&str>) -> Option<String> {
    let Some(prefix) = virtual_root.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) else {
        return Some(path.to_string());
    };
    if path == prefix {
        return None;
    }
    match path.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => Some(rest.to_string()),
        None => Some(path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{build_pool, probe};
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case::append_to_empty("", MutationOp::Append, "a", "a\n")]
    #[case::append_adds_newline("x", MutationOp::Append, "a", "x\na\n")]
    #[case::append_is_idempotent("x\na\n", MutationOp::Append, "a", "x\na\n")]
    #[case::prepend("x\n", MutationOp::Prepend, "#!/bin/sh", "#!/bin/sh\nx\n")]
    #[case::prepend_is_idempotent("#!/bin/sh\nx\n", MutationOp::Prepend, "#!/bin/sh", "#!/bin/sh\nx\n")]
    #[case::subtract_lines("a\nDEBUG=1\nb\n", MutationOp::Subtract, "^DEBUG=.*\\n", "a\nb\n")]
    fn mutations(
        #[case] base: &str,
        #[case] op: MutationOp,
        #[case] fragment: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(mutate(base, &op, fragment).unwrap(), expected);
    }

    #[test]
    fn rewrite_replaces_every_match() {
        let op = MutationOp::Rewrite {
            replacement: "debug=false".to_string(),
        };
        let out = mutate("debug=true\nx\ndebug=true\n", &op, "debug=true").unwrap();
        assert_eq!(out, "debug=false\nx\ndebug=false\n");
    }

    #[test]
    fn bad_pattern_is_reported() {
        assert!(mutate("x", &MutationOp::Subtract, "(").is_err());
    }

    #[test]
    fn intents_hash_final_bytes() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("base.py"), "seeded").unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "target/\n").unwrap();

        let mut seeded = PlannedEntry::file("copy.py", "", 2);
        seeded.content = None;
        seeded.seed = Some("base.py".to_string());
        let mut appended = PlannedEntry::file(".gitignore", "*.log", 3);
        appended.mutation = MutationOp::Append;
        let entries = vec![
            PlannedEntry::dir("src", 1),
            seeded,
            appended,
            PlannedEntry::file("a.txt", "hello", 4),
        ];

        let mut present = Snapshot::new();
        present.insert(
            ".gitignore".to_string(),
            probe(tmp.path(), ".gitignore", 1024).unwrap(),
        );
        let pool = build_pool(2).unwrap();
        let (intents, faults) = compute(tmp.path(), &entries, &present, &pool);

        assert!(faults.is_empty(), "{faults:?}");
        assert!(intents["src"].hash.is_none());
        assert_eq!(intents["copy.py"].data, b"seeded");
        assert_eq!(intents[".gitignore"].text(), Some("target/\n*.log\n"));
        assert_eq!(
            intents["a.txt"].hash.as_deref(),
            Some(sha256_hex(b"hello").as_str())
        );
    }

    #[test]
    fn missing_seed_is_a_fault() {
        let tmp = TempDir::new().unwrap();
        let mut entry = PlannedEntry::file("copy.py", "", 1);
        entry.content = None;
        entry.seed = Some("gone.py".to_string());
        let pool = build_pool(1).unwrap();
        let (intents, faults) = compute(tmp.path(), &[entry], &Snapshot::new(), &pool);
        assert!(intents.is_empty());
        assert_eq!(faults.len(), 1);
        assert!(faults[0].reason.contains("gone.py"));
    }

    #[test]
    fn virtual_root_is_stripped() {
        assert_eq!(strip_virtual_root("app/src/x", Some("app")), Some("src/x".into()));
        assert_eq!(strip_virtual_root("app", Some("/app/")), None);
        assert_eq!(strip_virtual_root("other/x", Some("app")), Some("other/x".into()));
        assert_eq!(strip_virtual_root("x", None), Some("x".into()));
    }
}
