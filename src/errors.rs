// src/errors.rs

//! Crate-wide error type.
//!
//! Module-specific failures (`GraphError`, `ExecError`, `DepsError`, ...) live
//! next to the code that produces them; this enum is what the schedule walk and
//! the builder hand back to callers.

use thiserror::Error;

use crate::build::StepError;
use crate::graph::GraphError;
use crate::hashfs::HashFsError;

#[derive(Error, Debug)]
pub enum SisoError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in build graph: {0}")]
    GraphCycle(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    HashFs(#[from] HashFsError),

    #[error("missing source {0:?}")]
    MissingSource(String),

    #[error("build canceled")]
    Canceled,

    #[error("step {step} failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("{failed} step(s) failed")]
    BuildFailed { failed: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SisoError>;
