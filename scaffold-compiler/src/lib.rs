//! # scaffold-compiler
//!
//! Turns blueprint text into the flat list of entries and commands a sync run
//! acts on. Compilation never fails on bad input; problems are reported as
//! [`Diagnostic`]s and the offending lines are skipped.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scaffold_compiler::{compile, CompileOptions};
//!
//! let blueprint = "$$ name = demo\nsrc/\n    {{ name }}.py :: print('hi')\n";
//! let compiled = compile(blueprint, &CompileOptions::default());
//! for entry in &compiled.entries {
//!     println!("{} (line {})", entry.path, entry.line);
//! }
//! for d in &compiled.diagnostics {
//!     eprintln!("{d}");
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use scaffold_core::config::Config;
use scaffold_core::types::{Diagnostic, PlannedEntry, ResolvedCommand, Severity};

pub mod ast;
pub mod block;
pub mod context;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod stack;

pub use engine::TemplateEngine;
pub use error::CompileError;
pub use parser::{parse, ParsedBlueprint};
pub use resolver::{resolve, VirtualManifest, MAX_RECURSION_DEPTH};

/// Inputs that shape compilation besides the blueprint text.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub tab_width: usize,
    /// Root `exists()` falls back to for paths not planned by the blueprint.
    pub project_root: Option<PathBuf>,
    /// Lowest-precedence variables (from config).
    pub defaults: BTreeMap<String, Value>,
    /// Highest-precedence variables (from the command line).
    pub overrides: BTreeMap<String, Value>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            tab_width: lexer::DEFAULT_TAB_WIDTH,
            project_root: None,
            defaults: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }
}

impl CompileOptions {
    pub fn from_config(config: &Config, project_root: &Path) -> Self {
        Self {
            tab_width: config.tab_width,
            project_root: Some(project_root.to_path_buf()),
            defaults: config.variables.clone(),
            overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompiledBlueprint {
    pub entries: Vec<PlannedEntry>,
    pub commands: Vec<ResolvedCommand>,
    /// Parse and resolve diagnostics, ordered by line.
    pub diagnostics: Vec<Diagnostic>,
    pub variables: Map<String, Value>,
}

impl CompiledBlueprint {
    pub fn worst_severity(&self) -> Option<Severity> {
        self.diagnostics.iter().map(|d| d.severity).max()
    }

    /// Whether any diagnostic is at least `threshold`.
    pub fn blocks_at(&self, threshold: Severity) -> bool {
        self.worst_severity().is_some_and(|s| s >= threshold)
    }

    pub fn has_errors(&self) -> bool {
        self.blocks_at(Severity::Error)
    }
}

pub fn compile(source: &str, options: &CompileOptions) -> CompiledBlueprint {
    let parsed = parser::parse(source, options.tab_width);
    let resolution = resolver::resolve(&parsed, options);

    let mut diagnostics = parsed.diagnostics;
    diagnostics.extend(resolution.diagnostics);
    diagnostics.sort_by_key(|d| d.line);

    tracing::debug!(
        "compiled blueprint: {} entries, {} commands, {} diagnostics",
        resolution.entries.len(),
        resolution.commands.len(),
        diagnostics.len()
    );
    CompiledBlueprint {
        entries: resolution.entries,
        commands: resolution.commands,
        diagnostics,
        variables: resolution.variables,
    }
}

pub fn compile_file(path: &Path, options: &CompileOptions) -> Result<CompiledBlueprint, CompileError> {
    let source = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(compile(&source, options))
}
