// src/build/mod.rs

//! The builder: workers that pull ready steps from the Plan and run them.
//!
//! - [`builder`] owns the worker pool and the build-wide resources
//!   (semaphores, deps log, executors).
//! - [`run_step`] is the per-step flow: up-to-date check, local or remote
//!   dispatch, output processing.
//! - [`remote`] holds the remote path: fast deps, preprocessing, cache
//!   lookup, remote execution and local fallback.
//! - [`outputs`] records outputs and updates deps after a command ran.
//! - [`stats`] aggregates step metrics.

pub mod builder;
pub mod outputs;
pub mod remote;
pub mod run_step;
pub mod stats;

use thiserror::Error;

use crate::deps::DepsError;
use crate::exec::ExecError;
use crate::hashfs::HashFsError;

pub use builder::{Builder, BuilderOptions};
pub use stats::BuildStats;

/// Why a single step failed.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("command exited with status {0}")]
    ExitStatus(i32),

    #[error("output {0} was not produced")]
    MissingOutput(String),

    #[error(transparent)]
    Deps(#[from] DepsError),

    #[error("command printed output and fail_on_stdouterr is set")]
    StdoutErr,

    #[error(transparent)]
    HashFs(#[from] HashFsError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StepError {
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            StepError::Exec(ExecError::Canceled) | StepError::Deps(DepsError::Canceled)
        )
    }
}
