//! `scaffold status`: drift between the chronicle and disk.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use scaffold_sync::audit::{self, AuditReport, DriftSignal};
use scaffold_sync::{history, LoadState};

use super::ProjectArgs;

/// Arguments for `scaffold status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "tracked")]
    tracked: usize,
    #[tabled(rename = "last run")]
    last_run: String,
    #[tabled(rename = "runs")]
    runs: usize,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let project = self.project.load(Default::default())?;
        let report = audit::check(
            &project.root,
            &project.options.blueprint,
            project.config.worker_count(),
            project.config.max_preview_bytes,
        )
        .with_context(|| format!("status check failed for '{}'", project.root.display()))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report)
                    .context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        let runs = history::read_at(&project.root)
            .context("failed to read run history")?
            .len();
        print_table(&project.root.display().to_string(), &report, runs);
        Ok(())
    }
}

fn print_table(root: &str, report: &AuditReport, runs: usize) {
    println!("Scaffold v{} | {root}", env!("CARGO_PKG_VERSION"));

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    println!(
        "Indicators: {} CURRENT  {} STALE  {} MODIFIED  {} NEVER SYNCED",
        signal_indicator(&DriftSignal::Current),
        signal_indicator(&DriftSignal::Stale {
            reason: String::new(),
        }),
        signal_indicator(&DriftSignal::Modified { files: Vec::new() }),
        signal_indicator(&DriftSignal::NeverSynced),
    );
    println!("{separator}");

    let row = StatusTableRow {
        status: format!(
            "{} {}",
            signal_indicator(&report.signal),
            signal_label(&report.signal)
        ),
        detail: signal_detail(report),
        tracked: report.tracked,
        last_run: report
            .age
            .as_ref()
            .map(|age| format!("{age} ago"))
            .unwrap_or_else(|| "never".to_string()),
        runs,
    };
    let mut table = Table::new(vec![row]);
    table.with(Style::rounded());
    println!("{table}");

    for path in &report.modified {
        println!("  {}  {path}", "M".red());
    }
    for path in &report.missing {
        println!("  {}  {path}", "D".yellow());
    }
    if !matches!(report.signal, DriftSignal::Current) {
        println!("Run 'scaffold plan' to review, then 'scaffold apply'.");
    }
}

fn signal_label(signal: &DriftSignal) -> &'static str {
    match signal {
        DriftSignal::NeverSynced => "NEVER SYNCED",
        DriftSignal::Current => "CURRENT",
        DriftSignal::Stale { .. } => "STALE",
        DriftSignal::Modified { .. } => "MODIFIED",
    }
}

fn signal_indicator(signal: &DriftSignal) -> String {
    match signal {
        DriftSignal::NeverSynced => "■".bright_black().bold().to_string(),
        DriftSignal::Current => "■".green().bold().to_string(),
        DriftSignal::Stale { .. } => "■".yellow().bold().to_string(),
        DriftSignal::Modified { .. } => "■".red().bold().to_string(),
    }
}

fn signal_detail(report: &AuditReport) -> String {
    match &report.signal {
        DriftSignal::NeverSynced => match &report.chronicle {
            LoadState::Corrupt { reason } => format!("chronicle corrupt: {reason}"),
            _ => "no chronicle entries".to_string(),
        },
        DriftSignal::Current => "up to date".to_string(),
        DriftSignal::Stale { reason } => reason.clone(),
        DriftSignal::Modified { files } => format!("{} edited", summarize_files(files)),
    }
}

fn summarize_files(files: &[String]) -> String {
    if files.is_empty() {
        return "unknown file".to_string();
    }
    let mut names: Vec<String> = files.iter().take(2).cloned().collect();
    if files.len() > names.len() {
        names.push(format!("+{} more", files.len() - names.len()));
    }
    names.join(", ")
}
