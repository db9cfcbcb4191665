//! Layered YAML configuration.
//!
//! # Layers (lowest precedence first)
//!
//! ```text
//! built-in defaults
//! <config_dir>/scaffold/config.yaml     (user)
//! <root>/.scaffold/config.yaml          (project)
//! command-line flags                    (applied by the caller)
//! ```
//!
//! # API pattern
//!
//! - `fn_at(root, user_file, …)` takes every location explicitly; tests use this.
//! - `fn(root)` resolves the user file through `dirs` and delegates to `_at`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::paths;
use crate::types::Severity;

/// Hard ceiling on worker threads when `workers` is left on auto.
pub const MAX_AUTO_WORKERS: usize = 8;

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// Effective configuration for one project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Visual width a tab advances to when measuring indentation.
    pub tab_width: usize,
    /// Size of the disk-scan worker pool; `None` picks from available parallelism.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Write failures at or above this severity block the Chronicle commit.
    pub commit_threshold: Severity,
    /// Prefix stripped from planned and recorded paths before comparison.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_root: Option<String>,
    /// Append each committed run to `.scaffold/history.jsonl`.
    pub history: bool,
    /// Text larger than this is never loaded for diff previews.
    pub max_preview_bytes: u64,
    /// Default blueprint variables; script definitions and `--set` override them.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tab_width: 4,
            workers: None,
            commit_threshold: Severity::Error,
            virtual_root: None,
            history: true,
            max_preview_bytes: 256 * 1024,
            variables: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Resolved worker count, never zero.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(MAX_AUTO_WORKERS),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tab_width == 0 {
            return Err(ConfigError::Invalid {
                field: "tab_width",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid {
                field: "workers",
                reason: "must be at least 1 (omit for auto)".to_string(),
            });
        }
        Ok(())
    }

    fn merge(&mut self, layer: ConfigLayer) {
        if let Some(v) = layer.tab_width {
            self.tab_width = v;
        }
        if let Some(v) = layer.workers {
            self.workers = Some(v);
        }
        if let Some(v) = layer.commit_threshold {
            self.commit_threshold = v;
        }
        if let Some(v) = layer.virtual_root {
            self.virtual_root = Some(v);
        }
        if let Some(v) = layer.history {
            self.history = v;
        }
        if let Some(v) = layer.max_preview_bytes {
            self.max_preview_bytes = v;
        }
        self.variables.extend(layer.variables);
    }
}

/// One config file as written on disk; absent keys leave lower layers intact.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigLayer {
    tab_width: Option<usize>,
    workers: Option<usize>,
    commit_threshold: Option<Severity>,
    virtual_root: Option<String>,
    history: Option<bool>,
    max_preview_bytes: Option<u64>,
    #[serde(default)]
    variables: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

fn load_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(Some(ConfigLayer::default()));
    }
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Load the effective config for `root`, reading the user layer from
/// `user_file` when given.
pub fn load_at(root: &Path, user_file: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    if let Some(user_file) = user_file {
        if let Some(layer) = load_layer(user_file)? {
            config.merge(layer);
        }
    }
    if let Some(layer) = load_layer(&paths::config_path(root))? {
        config.merge(layer);
    }
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper using the platform config directory.
pub fn load(root: &Path) -> Result<Config, ConfigError> {
    let user = paths::user_config_path();
    load_at(root, user.as_deref())
}

// ---------------------------------------------------------------------------
// 3. Save
// ---------------------------------------------------------------------------

/// Write `config` to `<root>/.scaffold/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `rename`.
pub fn save_at(root: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    config.validate()?;
    let path = paths::config_path(root);
    let dir = paths::state_dir(root);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_file_name(format!("{}.tmp", paths::CONFIG_FILE));
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
