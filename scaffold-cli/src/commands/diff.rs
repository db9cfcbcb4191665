//! `scaffold diff`: unified diffs for what apply would write.

use anyhow::{Context, Result};
use clap::Args;

use scaffold_sync::pipeline;

use super::{print_diagnostics, ProjectArgs};

/// Arguments for `scaffold diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let project = self.project.load(Default::default())?;
        let planned = pipeline::plan(&project.root, &project.config, &project.options)
            .with_context(|| format!("diff failed for '{}'", project.root.display()))?;
        print_diagnostics(&planned.compiled.diagnostics);

        let diffs = scaffold_sync::diff::plan_diffs(&planned.plan, &planned.intents);
        if diffs.is_empty() {
            println!("No differences for '{}'.", project.root.display());
            return Ok(());
        }

        for diff in diffs {
            print!("{}", diff.unified_diff);
            if !diff.unified_diff.ends_with('\n') {
                println!();
            }
        }
        Ok(())
    }
}
