//! `scaffold init`: project config plus a starter blueprint.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use scaffold_core::{config, paths, Config};

const STARTER_BLUEPRINT: &str = "\
# Lines ending in / are directories; `::` gives a file inline content.
$$ project = app

README.md :: \"# {{ project }}\"
src/
    main.py :: \"print('hello from {{ project }}')\"
";

/// Create `.scaffold/config.yaml` and `blueprint.scaffold` in a project root.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project root directory.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.root.display()))?;

        let config_path = paths::config_path(&root);
        if config_path.exists() {
            println!("· {} already exists", config_path.display());
        } else {
            let path = config::save_at(&root, &Config::default())
                .with_context(|| format!("failed to write config under '{}'", root.display()))?;
            println!("✓ Wrote {}", path.display());
        }

        let blueprint = paths::default_blueprint_path(&root);
        if blueprint.exists() {
            println!("· {} already exists", blueprint.display());
        } else {
            std::fs::write(&blueprint, STARTER_BLUEPRINT)
                .with_context(|| format!("failed to write '{}'", blueprint.display()))?;
            println!("✓ Wrote {}", blueprint.display());
        }
        println!("  Next: scaffold plan --root {}", root.display());
        Ok(())
    }
}
