//! `scaffold plan`: read-only preview of the next apply.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use scaffold_core::types::{Diagnostic, ResolvedCommand};
use scaffold_sync::pipeline;
use scaffold_sync::{LoadState, ReconciliationPlan, Summary};

use super::{policy, print_diagnostics, ProjectArgs};

/// Arguments for `scaffold plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Plan as if conflicts will be overridden.
    #[arg(long)]
    pub force: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct PlanJson<'a> {
    summary: Summary,
    chronicle: &'a LoadState,
    plan: &'a ReconciliationPlan,
    diagnostics: &'a [Diagnostic],
    commands: &'a [ResolvedCommand],
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let project = self.project.load(policy(self.force))?;
        let planned = pipeline::plan(&project.root, &project.config, &project.options)
            .with_context(|| format!("plan failed for '{}'", project.root.display()))?;

        if self.json {
            let payload = PlanJson {
                summary: planned.plan.summary(),
                chronicle: &planned.load_state,
                plan: &planned.plan,
                diagnostics: &planned.compiled.diagnostics,
                commands: &planned.compiled.commands,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }

        print_diagnostics(&planned.compiled.diagnostics);
        if let LoadState::Corrupt { reason } = &planned.load_state {
            eprintln!(
                "{} chronicle is corrupt ({reason}); apply will back it up",
                "warning:".yellow().bold()
            );
        }
        print_plan(&planned.plan);
        Ok(())
    }
}

pub fn print_plan(plan: &ReconciliationPlan) {
    let summary = plan.summary();
    if plan.is_noop() && plan.conflicts.is_empty() && plan.faults.is_empty() {
        println!("✓ nothing to do ({} unchanged)", summary.unchanged);
        return;
    }

    for mv in &plan.moves {
        println!("  {}  {} -> {}", "→".cyan(), mv.from, mv.to);
    }
    for change in &plan.create {
        let suffix = if change.is_dir { "/" } else { "" };
        println!("  {}  {}{suffix}", "+".green(), change.path);
    }
    for update in &plan.update {
        match &update.mode {
            Some((before, after)) => println!(
                "  {}  {} (mode {} -> {after})",
                "~".yellow(),
                update.path,
                before.as_deref().unwrap_or("?")
            ),
            None => println!("  {}  {}", "~".yellow(), update.path),
        }
    }
    for change in &plan.delete {
        let suffix = if change.is_dir { "/" } else { "" };
        println!("  {}  {}{suffix}", "-".red(), change.path);
    }
    for conflict in &plan.overridden {
        println!("  {}  {conflict} (forced)", "!".yellow());
    }
    for conflict in &plan.conflicts {
        println!("  {}  {conflict}", "!".red().bold());
    }
    for fault in &plan.faults {
        println!(
            "  {}  {} (line {}): {}",
            "✗".red(),
            fault.path,
            fault.line,
            fault.reason
        );
    }

    println!(
        "{} create, {} update, {} delete, {} move, {} conflict, {} unchanged",
        summary.created,
        summary.updated,
        summary.deleted,
        summary.moved,
        summary.conflicts,
        summary.unchanged
    );
    if !plan.conflicts.is_empty() {
        println!("Resolve the conflicts by hand or rerun with --force.");
    }
}
