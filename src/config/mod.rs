// src/config/mod.rs

//! Build manifest loading and validation.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a manifest from disk.
//! - `validate.rs`: limits, duplicate outputs and cycle checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str, resolve_exec_root};
pub use model::{ConfigFile, ConfigSection, PoolConfig, RawConfigFile, StepConfig};
