//! Scaffold core library: domain types, layered configuration, project paths.
//!
//! - [`types`]: planned entries, permissions, diagnostics
//! - [`config`]: YAML config layers and `_at` loaders
//! - [`paths`]: well-known files inside a project root
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{
    Diagnostic, DiagnosticCode, MutationOp, Permissions, PlannedEntry, ResolvedCommand, Severity,
};
