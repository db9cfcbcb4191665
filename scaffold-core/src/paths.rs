use std::path::{Path, PathBuf};

pub const CHRONICLE_FILE: &str = "scaffold.lock";
pub const STATE_DIR: &str = ".scaffold";
pub const CONFIG_FILE: &str = "config.yaml";
pub const RUN_LOCK_FILE: &str = "run.lock";
pub const HISTORY_FILE: &str = "history.jsonl";
pub const DEFAULT_BLUEPRINT: &str = "blueprint.scaffold";

/// Suffix of the sibling file every atomic write goes through.
pub const TMP_SUFFIX: &str = ".scaffold.tmp";

pub fn chronicle_path(root: &Path) -> PathBuf {
    root.join(CHRONICLE_FILE)
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    state_dir(root).join(CONFIG_FILE)
}

pub fn lock_path(root: &Path) -> PathBuf {
    state_dir(root).join(RUN_LOCK_FILE)
}

pub fn history_path(root: &Path) -> PathBuf {
    state_dir(root).join(HISTORY_FILE)
}

pub fn default_blueprint_path(root: &Path) -> PathBuf {
    root.join(DEFAULT_BLUEPRINT)
}

/// `<config_dir>/scaffold/config.yaml`, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scaffold").join(CONFIG_FILE))
}

/// Paths the engine owns inside a project root; never planned, scanned or deleted.
pub fn is_internal(relative: &str) -> bool {
    relative == CHRONICLE_FILE
        || relative == STATE_DIR
        || relative.starts_with(&format!("{STATE_DIR}/"))
        || relative.ends_with(TMP_SUFFIX)
}
