// src/config/mod.rs

//! Configuration loading and validation for stepgraph.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a config file, from disk or a mock filesystem.
//! - `validate.rs`: turning the raw model into templates and engine settings.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_with_fs};
pub use model::{ConfigFile, EngineSettings, RawConfigFile};
