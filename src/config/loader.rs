// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a manifest from a given path without semantic validation.
///
/// Use [`load_and_validate`] unless you really want the raw form.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a manifest and validate it:
///
/// - at least one step,
/// - sane limits in `[config]` and `[pool.*]`,
/// - no output produced twice,
/// - no dependency cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Resolve `[config].exec_root` against the directory holding the manifest.
pub fn resolve_exec_root(config_path: &Path, exec_root: &str) -> PathBuf {
    let exec_root = Path::new(exec_root);
    if exec_root.is_absolute() {
        return exec_root.to_path_buf();
    }
    let base = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    let joined = base.join(exec_root);
    joined.canonicalize().unwrap_or(joined)
}
