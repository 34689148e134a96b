// src/config/loader.rs

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, StepgraphError};
use crate::fs::{FileSystem, RealFileSystem};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** validate templates
/// or engine settings. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    load_raw_with_fs(&RealFileSystem, path.as_ref())
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` default functions).
/// - Checks engine bounds, durations and versions.
/// - Builds every template and rejects unknown dependencies and cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    load_with_fs(&RealFileSystem, path.as_ref())
}

/// Same as [`load_and_validate`], reading through the given filesystem.
pub fn load_with_fs(fs: &dyn FileSystem, path: &Path) -> Result<ConfigFile> {
    let raw = load_raw_with_fs(fs, path)?;
    let config = ConfigFile::try_from(raw)?;
    debug!(
        path = %path.display(),
        templates = config.templates.len(),
        "config loaded"
    );
    Ok(config)
}

fn load_raw_with_fs(fs: &dyn FileSystem, path: &Path) -> Result<RawConfigFile> {
    if !fs.exists(path) {
        return Err(StepgraphError::ConfigError(format!(
            "config file {} does not exist",
            path.display()
        )));
    }
    let contents = fs.read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// `Stepgraph.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Stepgraph.toml")
}
