//! `scaffold apply`: materialize the blueprint and commit the chronicle.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use scaffold_sync::pipeline::{self, ApplyOutcome};
use scaffold_sync::{Conflict, SyncError, WriteAction, WriteResult};

use super::{policy, print_diagnostics, ProjectArgs};

/// Arguments for `scaffold apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Show what would be written without touching any file.
    #[arg(long)]
    pub dry_run: bool,

    /// Overwrite or delete files edited outside scaffold.
    #[arg(long)]
    pub force: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ApplyArgs {
    pub fn run(self) -> Result<()> {
        let project = self.project.load(policy(self.force))?;
        let mut options = project.options;
        options.simulate = self.dry_run;

        let history = pipeline::history_sink(&project.root, &project.config);
        let outcome =
            match pipeline::apply(&project.root, &project.config, &options, history.as_ref()) {
                Ok(outcome) => outcome,
                Err(e) => {
                    if self.json {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&ApplyErrorJson::from(&e))
                                .context("failed to serialize apply JSON")?
                        );
                    }
                    return Err(anyhow::Error::new(e)
                        .context(format!("apply failed for '{}'", project.root.display())));
                }
            };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome)
                    .context("failed to serialize apply JSON")?
            );
        } else {
            print_diagnostics(&outcome.diagnostics);
            print_outcome(&outcome);
        }

        if !outcome.simulated && !outcome.committed {
            bail!("chronicle not committed; fix the failures above and rerun");
        }
        Ok(())
    }
}

/// `--json` payload for a run that stopped before writing.
#[derive(Serialize)]
struct ApplyErrorJson<'a> {
    committed: bool,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    conflicts: &'a [Conflict],
}

impl<'a> From<&'a SyncError> for ApplyErrorJson<'a> {
    fn from(err: &'a SyncError) -> Self {
        let (error, conflicts): (&'static str, &'a [Conflict]) = match err {
            SyncError::Conflicts(conflicts) => ("conflicts", conflicts),
            SyncError::Blueprint { .. } => ("blueprint", &[]),
            SyncError::Locked { .. } => ("locked", &[]),
            SyncError::Compile(_) => ("compile", &[]),
            SyncError::Config(_) => ("config", &[]),
            SyncError::Io { .. } | SyncError::Json(_) | SyncError::Pool(_) => ("io", &[]),
        };
        Self {
            committed: false,
            error,
            message: err.to_string(),
            conflicts,
        }
    }
}

fn print_outcome(outcome: &ApplyOutcome) {
    let prefix = if outcome.simulated { "[dry-run] " } else { "" };
    if outcome.writes.is_empty() && outcome.faults.is_empty() {
        println!(
            "{prefix}✓ nothing to do ({} unchanged)",
            outcome.summary.unchanged
        );
    } else {
        let s = outcome.summary;
        println!(
            "{prefix}✓ {} created, {} updated, {} deleted, {} moved, {} unchanged",
            s.created, s.updated, s.deleted, s.moved, s.unchanged
        );
        for write in &outcome.writes {
            print_write(write);
        }
        for fault in &outcome.faults {
            println!("  ✗  {} (line {}): {}", fault.path, fault.line, fault.reason);
        }
    }

    if !outcome.commands.is_empty() {
        println!("Post-run commands (not executed):");
        for command in &outcome.commands {
            println!("  $ {}", command.command);
        }
    }
    if let Some(path) = &outcome.chronicle {
        println!("Chronicle: {}", path.display());
    }
}

fn print_write(write: &WriteResult) {
    if !write.success {
        let line = format!(
            "  ✗  {}: {}",
            write.path,
            write.error.as_deref().unwrap_or("failed")
        );
        println!("{}", line.red());
        return;
    }
    let symbol = if write.simulated { "~" } else { "✎" };
    match &write.action {
        WriteAction::Moved { from } => println!("  {symbol}  {from} -> {}", write.path),
        WriteAction::Deleted | WriteAction::DirRemoved => {
            println!("  {symbol}  {} (removed)", write.path)
        }
        WriteAction::DirCreated => println!("  {symbol}  {}/", write.path),
        WriteAction::Created | WriteAction::Updated => println!("  {symbol}  {}", write.path),
    }
}
