//! Reconciliation oracle: three-way comparison of Past (chronicle), Present
//! (disk) and Future (intents) into a [`ReconciliationPlan`].
//!
//! # Classification (files)
//!
//! | Past  | Present          | Future | Result    |
//! |-------|------------------|--------|-----------|
//! | any   | hN == hF         | yes    | unchanged |
//! | any   | absent           | yes    | create    |
//! | –     | hN ≠ hF          | yes    | update    |
//! | hP    | hN == hP         | yes    | update    |
//! | hP    | hN ≠ hP, ≠ hF    | yes    | conflict  |
//! | hP    | absent           | –      | delete    |
//! | hP    | hN == hP         | –      | delete    |
//! | hP    | hN ≠ hP          | –      | conflict  |
//!
//! Directories are existence-only. A path that is a directory on one side
//! and a file on the other is always a conflict. A file whose content already
//! matches but whose planned mode differs from disk is an update that only
//! changes the mode.
//!
//! After classification, creates whose intended hash equals the hash of a
//! pending delete are paired into moves.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use scaffold_core::types::Permissions;

use crate::chronicle::{Manifest, ManifestEntry};
use crate::diff;
use crate::intent::{Intent, IntentFault, Intents};
use crate::snapshot::{DiskFact, Snapshot};

// ---------------------------------------------------------------------------
// Plan types
// ---------------------------------------------------------------------------

/// What to do when tracked content diverged from the chronicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Stop before writing anything.
    #[default]
    Abort,
    /// Overwrite or delete the divergent content.
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The file was edited outside the tool since the last run.
    Diverged,
    /// Directory on one side, file on the other.
    KindMismatch,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictReason::Diverged => "modified outside scaffold",
            ConflictReason::KindMismatch => "file/directory mismatch",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub path: String,
    pub reason: ConflictReason,
    pub past: Option<String>,
    pub present: Option<String>,
    pub future: Option<String>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}; expected {}, found {})",
            self.path,
            self.reason,
            short(self.past.as_deref()),
            short(self.present.as_deref())
        )
    }
}

fn short(hash: Option<&str>) -> &str {
    match hash {
        Some(h) => h.get(..12).unwrap_or(h),
        None => "-",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Update {
    pub path: String,
    pub before: Option<String>,
    pub after: Option<String>,
    /// Unified diff; absent for binary or oversized content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// `(disk, planned)` octal modes when the planned mode differs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<(Option<String>, String)>,
}

impl Update {
    /// Content is already right; only the mode changes.
    pub fn is_mode_only(&self) -> bool {
        self.mode.is_some() && self.before.is_some() && self.before == self.after
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Move {
    pub from: String,
    pub to: String,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub moved: usize,
    pub conflicts: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub create: Vec<Change>,
    pub update: Vec<Update>,
    pub delete: Vec<Change>,
    pub moves: Vec<Move>,
    /// Unresolved; these block an apply.
    pub conflicts: Vec<Conflict>,
    /// Conflicts turned into updates or deletes by [`ConflictPolicy::Force`].
    pub overridden: Vec<Conflict>,
    pub unchanged: Vec<String>,
    /// Planned files whose content could not be computed; left untouched.
    pub faults: Vec<IntentFault>,
}

impl ReconciliationPlan {
    pub fn summary(&self) -> Summary {
        Summary {
            created: self.create.len(),
            updated: self.update.len(),
            deleted: self.delete.len(),
            moved: self.moves.len(),
            conflicts: self.conflicts.len(),
            unchanged: self.unchanged.len(),
        }
    }

    /// Nothing would be written.
    pub fn is_noop(&self) -> bool {
        self.create.is_empty()
            && self.update.is_empty()
            && self.delete.is_empty()
            && self.moves.is_empty()
    }
}

// ---------------------------------------------------------------------------
// reconcile
// ---------------------------------------------------------------------------

enum Verdict {
    Unchanged,
    Create,
    Update,
    Delete,
    Conflict(ConflictReason),
}

/// Build the plan. `present` must cover every path in `future` and `past`.
pub fn reconcile(
    future: &Intents,
    past: &Manifest,
    present: &Snapshot,
    policy: ConflictPolicy,
    faults: Vec<IntentFault>,
) -> ReconciliationPlan {
    let absent = DiskFact::absent();
    let faulted: BTreeSet<&str> = faults.iter().map(|f| f.path.as_str()).collect();
    let mut plan = ReconciliationPlan::default();

    let paths: BTreeSet<&String> = future.keys().chain(past.keys()).collect();
    for path in paths {
        if faulted.contains(path.as_str()) {
            continue;
        }
        let intent = future.get(path);
        let recorded = past.get(path);
        let fact = present.get(path).unwrap_or(&absent);

        let verdict = match intent {
            Some(intent) => classify_future(intent, recorded, fact),
            None => match recorded {
                Some(recorded) => classify_past_only(recorded, fact),
                None => continue,
            },
        };
        tracing::debug!("{path}: {}", verdict_name(&verdict));

        match verdict {
            Verdict::Unchanged => plan.unchanged.push(path.clone()),
            Verdict::Create => plan.create.push(change(path, intent, recorded)),
            Verdict::Delete => plan.delete.push(change(path, None, recorded)),
            Verdict::Update => plan.update.push(update(path, intent, fact)),
            Verdict::Conflict(reason) => {
                let conflict = Conflict {
                    path: path.clone(),
                    reason,
                    past: recorded.and_then(|r| r.sha256.clone()),
                    present: fact.hash.clone(),
                    future: intent.and_then(|i| i.hash.clone()),
                };
                if policy == ConflictPolicy::Force && reason == ConflictReason::Diverged {
                    if intent.is_some() {
                        plan.update.push(update(path, intent, fact));
                    } else {
                        plan.delete.push(change(path, None, recorded));
                    }
                    plan.overridden.push(conflict);
                } else {
                    plan.conflicts.push(conflict);
                }
            }
        }
    }

    pair_moves(&mut plan, future, present);
    plan.faults = faults;
    plan
}

fn classify_future(intent: &Intent, recorded: Option<&ManifestEntry>, fact: &DiskFact) -> Verdict {
    if !fact.exists {
        return Verdict::Create;
    }
    if intent.is_dir || fact.is_dir {
        return if intent.is_dir && fact.is_dir {
            Verdict::Unchanged
        } else {
            Verdict::Conflict(ConflictReason::KindMismatch)
        };
    }
    if fact.hash == intent.hash {
        return if mode_change(intent, fact).is_some() {
            Verdict::Update
        } else {
            Verdict::Unchanged
        };
    }
    match recorded {
        None => Verdict::Update,
        Some(r) if r.sha256.is_some() && r.sha256 == fact.hash => Verdict::Update,
        Some(_) => Verdict::Conflict(ConflictReason::Diverged),
    }
}

fn classify_past_only(recorded: &ManifestEntry, fact: &DiskFact) -> Verdict {
    if !fact.exists {
        return Verdict::Delete;
    }
    if recorded.is_dir != fact.is_dir {
        return Verdict::Conflict(ConflictReason::KindMismatch);
    }
    if recorded.is_dir || recorded.sha256 == fact.hash {
        Verdict::Delete
    } else {
        Verdict::Conflict(ConflictReason::Diverged)
    }
}

fn verdict_name(verdict: &Verdict) -> &'static str {
    match verdict {
        Verdict::Unchanged => "unchanged",
        Verdict::Create => "create",
        Verdict::Update => "update",
        Verdict::Delete => "delete",
        Verdict::Conflict(_) => "conflict",
    }
}

fn change(path: &str, intent: Option<&Intent>, recorded: Option<&ManifestEntry>) -> Change {
    match intent {
        Some(i) => Change {
            path: path.to_string(),
            is_dir: i.is_dir,
            hash: i.hash.clone(),
        },
        None => Change {
            path: path.to_string(),
            is_dir: recorded.is_some_and(|r| r.is_dir),
            hash: recorded.and_then(|r| r.sha256.clone()),
        },
    }
}

fn update(path: &str, intent: Option<&Intent>, fact: &DiskFact) -> Update {
    let after = intent.and_then(|i| i.hash.clone());
    let diff = match (fact.text.as_deref(), intent.and_then(Intent::text)) {
        _ if after.is_some() && after == fact.hash => None,
        (Some(before), Some(after)) => Some(diff::unified(path, before, after)),
        _ => None,
    };
    Update {
        path: path.to_string(),
        before: fact.hash.clone(),
        after,
        diff,
        mode: intent.and_then(|i| mode_change(i, fact)),
    }
}

/// The planned mode, when it differs from the permission bits on disk.
/// Disk facts without a mode (non-unix) never differ.
fn mode_change(intent: &Intent, fact: &DiskFact) -> Option<(Option<String>, String)> {
    let planned = intent.permissions?;
    let on_disk = fact.permissions.as_deref()?;
    let same = Permissions::parse(on_disk).is_some_and(|p| p.mode() & 0o777 == planned.mode() & 0o777);
    if same {
        None
    } else {
        Some((Some(on_disk.to_string()), planned.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Translocation
// ---------------------------------------------------------------------------

/// Pair file creates with deletes of identical content.
fn pair_moves(plan: &mut ReconciliationPlan, future: &Intents, present: &Snapshot) {
    let mut by_hash: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for removal in plan.delete.iter().filter(|d| !d.is_dir) {
        let Some(fact) = present.get(&removal.path).filter(|f| f.is_file()) else {
            continue;
        };
        if let Some(hash) = &fact.hash {
            by_hash
                .entry(hash.clone())
                .or_default()
                .push(removal.path.clone());
        }
    }
    if by_hash.is_empty() {
        return;
    }

    let mut consumed: BTreeSet<String> = BTreeSet::new();
    let mut remaining = Vec::with_capacity(plan.create.len());
    for created in std::mem::take(&mut plan.create) {
        let origin = match (&created.hash, created.is_dir) {
            (Some(hash), false) => by_hash.get_mut(hash).and_then(|candidates| {
                let seed = future.get(&created.path).and_then(|i| i.seed.as_deref());
                pick_origin(candidates, &created.path, seed)
            }),
            _ => None,
        };
        match origin {
            Some(from) => {
                tracing::debug!("move detected: {from} -> {}", created.path);
                consumed.insert(from.clone());
                plan.moves.push(Move {
                    from,
                    to: created.path.clone(),
                    hash: created.hash.clone().unwrap_or_default(),
                });
            }
            None => remaining.push(created),
        }
    }
    plan.create = remaining;
    plan.delete.retain(|d| !consumed.contains(&d.path));
}

/// Choose and remove the best origin among same-hash delete candidates.
fn pick_origin(candidates: &mut Vec<String>, destination: &str, seed: Option<&str>) -> Option<String> {
    let parent = parent_of(destination);
    let (idx, _) = candidates.iter().enumerate().min_by_key(|(_, c)| {
        (
            Some(c.as_str()) != seed,
            parent_of(c) != parent,
            Reverse(common_prefix_len(c, destination)),
            (*c).clone(),
        )
    })?;
    Some(candidates.remove(idx))
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}
