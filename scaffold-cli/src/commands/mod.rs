//! Subcommands plus the project arguments they share.

pub mod apply;
pub mod diff;
pub mod init;
pub mod plan;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use scaffold_compiler::context::parse_scalar;
use scaffold_core::types::{Diagnostic, Severity};
use scaffold_core::{config, paths, Config};
use scaffold_sync::{ConflictPolicy, RunOptions};

/// Where the project lives and how to compile its blueprint.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Project root the blueprint materializes into.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Blueprint file [default: <root>/blueprint.scaffold].
    #[arg(long, short = 'b')]
    pub blueprint: Option<PathBuf>,

    /// Set a blueprint variable, overriding config and script; repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, String)>,

    /// Path prefix stripped from planned and recorded paths when the blueprint
    /// declares no `project_root`.
    #[arg(long, value_name = "PREFIX")]
    pub virtual_root: Option<String>,
}

/// A loaded project: canonical root, effective config, run options.
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
    pub options: RunOptions,
}

impl ProjectArgs {
    pub fn load(&self, policy: ConflictPolicy) -> Result<Project> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("cannot resolve root '{}'", self.root.display()))?;
        let mut config = config::load(&root)
            .with_context(|| format!("failed to load config for '{}'", root.display()))?;
        if let Some(prefix) = &self.virtual_root {
            config.virtual_root = Some(prefix.clone());
        }

        let blueprint = self
            .blueprint
            .clone()
            .unwrap_or_else(|| paths::default_blueprint_path(&root));
        let mut options = RunOptions::new(blueprint);
        options.policy = policy;
        options.overrides = self
            .set
            .iter()
            .map(|(name, value)| (name.clone(), parse_scalar(value)))
            .collect();

        Ok(Project {
            root,
            config,
            options,
        })
    }
}

fn parse_assignment(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

pub fn policy(force: bool) -> ConflictPolicy {
    if force {
        ConflictPolicy::Force
    } else {
        ConflictPolicy::Abort
    }
}

/// Print compile diagnostics to stderr, colored by severity.
pub fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        let label = match d.severity {
            Severity::Info => d.severity.to_string().blue(),
            Severity::Warning => d.severity.to_string().yellow(),
            Severity::Error | Severity::Critical => d.severity.to_string().red().bold(),
        };
        eprintln!("line {}: {label} [{}] {}", d.line, d.code, d.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_split_on_first_equals() {
        assert_eq!(
            parse_assignment("url=a=b").unwrap(),
            ("url".to_string(), "a=b".to_string())
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }
}
