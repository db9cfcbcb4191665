//! Shared pipeline entrypoints used by every CLI command.
//!
//! [`plan`] is read-only: compile, scan, reconcile. [`apply`] takes the run
//! lock, plans, materializes and commits the chronicle.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use scaffold_compiler::{compile_file, CompileOptions, CompiledBlueprint};
use scaffold_core::paths;
use scaffold_core::types::{Diagnostic, PlannedEntry, ResolvedCommand, Severity};
use scaffold_core::Config;

use crate::chronicle::{self, Chronicle, LoadState, Manifest, Provenance};
use crate::error::SyncError;
use crate::history::{HistoryRecord, HistorySink, JsonlHistory, NoHistory};
use crate::intent::{self, strip_virtual_root, IntentFault, Intents};
use crate::lock::RunLock;
use crate::materializer::{self, WriteResult};
use crate::oracle::{self, ConflictPolicy, ReconciliationPlan, Summary};
use crate::snapshot::{self, Snapshot};

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Blueprint variable that declares the virtual root (`$$ project_root = app`).
pub const ROOT_VARIABLE: &str = "project_root";

/// Per-run inputs that do not live in [`Config`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub blueprint: PathBuf,
    /// `--set name=value`; beats config defaults and script definitions.
    pub overrides: BTreeMap<String, Value>,
    pub policy: ConflictPolicy,
    /// Dry-run: report, touch nothing, never commit.
    pub simulate: bool,
}

impl RunOptions {
    pub fn new(blueprint: impl Into<PathBuf>) -> Self {
        Self {
            blueprint: blueprint.into(),
            overrides: BTreeMap::new(),
            policy: ConflictPolicy::Abort,
            simulate: false,
        }
    }
}

/// Everything a plan was derived from, plus the plan itself.
#[derive(Debug, Clone)]
pub struct Planned {
    pub compiled: CompiledBlueprint,
    pub chronicle: Chronicle,
    pub load_state: LoadState,
    /// Previous manifest with the virtual root stripped.
    pub past: Manifest,
    pub present: Snapshot,
    pub intents: Intents,
    pub plan: ReconciliationPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    /// The chronicle reflects disk after this run.
    pub committed: bool,
    pub simulated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub summary: Summary,
    pub writes: Vec<WriteResult>,
    pub diagnostics: Vec<Diagnostic>,
    pub faults: Vec<IntentFault>,
    /// Resolved orchestration commands, in document order. Never executed here.
    pub commands: Vec<ResolvedCommand>,
    /// Set when the chronicle file was rewritten.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chronicle: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

/// Compile the blueprint and reconcile it against the chronicle and disk.
///
/// Nothing is written; a corrupt chronicle is reported, not backed up.
pub fn plan(root: &Path, config: &Config, options: &RunOptions) -> Result<Planned, SyncError> {
    let mut compile_options = CompileOptions::from_config(config, root);
    compile_options.overrides = options.overrides.clone();
    let compiled = compile_file(&options.blueprint, &compile_options)?;

    let prefix = virtual_root(&compiled, config);
    let virtual_root = prefix.as_deref();
    let entries: Vec<PlannedEntry> = compiled
        .entries
        .iter()
        .filter_map(|entry| {
            let path = strip_virtual_root(&entry.path, virtual_root)?;
            let mut entry = entry.clone();
            entry.path = path;
            entry.seed = entry
                .seed
                .as_deref()
                .and_then(|seed| strip_virtual_root(seed, virtual_root));
            Some(entry)
        })
        .collect();

    let (chronicle, load_state) = chronicle::peek_at(root)?;
    let past: Manifest = chronicle
        .manifest
        .iter()
        .filter_map(|(path, entry)| {
            strip_virtual_root(path, virtual_root).map(|path| (path, entry.clone()))
        })
        .collect();

    let mut wanted: BTreeSet<String> = entries.iter().map(|e| e.path.clone()).collect();
    wanted.extend(past.keys().cloned());
    wanted.retain(|path| !paths::is_internal(path));

    let pool = snapshot::build_pool(config.worker_count())?;
    let present = snapshot::scan(root, &wanted, &pool, config.max_preview_bytes)?;
    let (intents, faults) = intent::compute(root, &entries, &present, &pool);
    let plan = oracle::reconcile(&intents, &past, &present, options.policy, faults);

    let summary = plan.summary();
    tracing::info!(
        "plan: {} create, {} update, {} delete, {} move, {} conflict, {} unchanged",
        summary.created,
        summary.updated,
        summary.deleted,
        summary.moved,
        summary.conflicts,
        summary.unchanged
    );

    Ok(Planned {
        compiled,
        chronicle,
        load_state,
        past,
        present,
        intents,
        plan,
    })
}

/// The prefix stripped from Future and Past keys: the blueprint's own
/// declaration first, then config / `--virtual-root`.
pub fn virtual_root(compiled: &CompiledBlueprint, config: &Config) -> Option<String> {
    let declared = compiled
        .variables
        .get(ROOT_VARIABLE)
        .and_then(Value::as_str)
        .map(|root| root.trim_matches('/'))
        .filter(|root| !root.is_empty());
    match declared {
        Some(root) => {
            tracing::debug!("blueprint declares virtual root '{root}'");
            Some(root.to_string())
        }
        None => config.virtual_root.clone(),
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// The history sink `config` asks for.
pub fn history_sink(root: &Path, config: &Config) -> Box<dyn HistorySink> {
    if config.history {
        Box::new(JsonlHistory::at(root))
    } else {
        Box::new(NoHistory)
    }
}

/// Plan, materialize and commit.
///
/// Stops before writing anything if the blueprint has errors or the plan
/// has unresolved conflicts. Write failures at or above
/// `config.commit_threshold` leave the chronicle untouched.
pub fn apply(
    root: &Path,
    config: &Config,
    options: &RunOptions,
    history: &dyn HistorySink,
) -> Result<ApplyOutcome, SyncError> {
    let _lock = if options.simulate {
        None
    } else {
        Some(RunLock::acquire(root)?)
    };

    let planned = plan(root, config, options)?;
    let Planned {
        compiled,
        chronicle,
        load_state,
        past,
        intents,
        plan,
        ..
    } = planned;

    if compiled.has_errors() {
        let errors: Vec<&Diagnostic> = compiled
            .diagnostics
            .iter()
            .filter(|d| d.severity >= Severity::Error)
            .collect();
        return Err(SyncError::Blueprint {
            errors: errors.len(),
            first: errors.first().map(|d| d.to_string()).unwrap_or_default(),
        });
    }
    if !plan.conflicts.is_empty() {
        return Err(SyncError::Conflicts(plan.conflicts));
    }
    for overridden in &plan.overridden {
        tracing::warn!("overriding conflict: {overridden}");
    }

    let writes = materializer::materialize(root, &plan, &intents, options.simulate);
    let summary = plan.summary();
    let mut outcome = ApplyOutcome {
        committed: false,
        simulated: options.simulate,
        run_id: None,
        summary,
        writes,
        diagnostics: compiled.diagnostics,
        faults: plan.faults.clone(),
        commands: compiled.commands,
        chronicle: None,
    };
    if options.simulate {
        return Ok(outcome);
    }

    let threshold = config.commit_threshold;
    let failed_writes = outcome.writes.iter().filter(|w| w.blocks_at(threshold)).count();
    let faults_block = !plan.faults.is_empty() && Severity::Error >= threshold;
    if failed_writes > 0 || faults_block {
        tracing::warn!(
            "chronicle not committed: {failed_writes} failed write(s), {} unresolved path(s)",
            plan.faults.len()
        );
        return Ok(outcome);
    }

    let manifest = chronicle::federate(&past, &plan, &intents, &outcome.writes);
    if manifest == chronicle.manifest && load_state == LoadState::Loaded {
        tracing::debug!("chronicle unchanged; nothing to commit");
        outcome.committed = true;
        return Ok(outcome);
    }
    if let LoadState::Corrupt { reason } = &load_state {
        chronicle::back_up_at(root, reason)?;
    }

    let run_id = Uuid::new_v4();
    let blueprint = options
        .blueprint
        .strip_prefix(root)
        .unwrap_or(&options.blueprint)
        .display()
        .to_string();
    let provenance = Provenance {
        run_id,
        timestamp_utc: Utc::now(),
        blueprint: blueprint.clone(),
        tool_version: TOOL_VERSION.to_string(),
        counts: summary,
    };
    let sealed = Chronicle::sealed(manifest, provenance.clone())?;
    let path = chronicle::save_at(root, &sealed)?;

    let record = HistoryRecord {
        run_id,
        timestamp_utc: provenance.timestamp_utc,
        blueprint,
        summary,
        seal: sealed.seal.clone(),
    };
    if let Err(e) = history.record(&record) {
        tracing::warn!("history not recorded: {e}");
    }

    outcome.committed = true;
    outcome.run_id = Some(run_id);
    outcome.chronicle = Some(path);
    Ok(outcome)
}
