// src/exec/mod.rs

//! Execution backends.
//!
//! The builder never spawns processes or talks to a remote service directly;
//! it goes through [`LocalExecutor`] and [`RemoteExecutor`]. Production local
//! runs use [`local::ProcessExecutor`]. There is no remote client in this
//! crate: callers plug one in, and tests use fakes.
//!
//! Executor errors are a closed set. Whether a failed remote run may be
//! retried locally is decided by [`ExecError::fallback_eligible`], a total
//! match over that set.

pub mod local;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::step::Cmd;

pub use local::ProcessExecutor;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("execution canceled")]
    Canceled,

    /// The remote platform or container image is broken. Needs an operator.
    #[error("bad platform container image: {0}")]
    BadContainer(String),

    /// Outputs are tied to an absolute path and can't move between machines.
    #[error("action is not relocatable: {0}")]
    NotRelocatable(String),

    /// Anything else: network errors, worker failures, non-zero remote exits.
    #[error("{0}")]
    Transient(String),
}

impl ExecError {
    /// Whether a remote failure may be retried by running locally.
    pub fn fallback_eligible(&self) -> bool {
        match self {
            ExecError::Canceled => false,
            ExecError::BadContainer(_) => false,
            ExecError::NotRelocatable(_) => false,
            ExecError::Transient(_) => true,
        }
    }

    /// Whether a failed speculative (fast deps) run may be retried on the
    /// normal path.
    pub fn retry_on_slow_path(&self) -> bool {
        !matches!(self, ExecError::Canceled | ExecError::BadContainer(_))
    }
}

/// Result of running (or looking up) a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Served from the remote action cache.
    pub cached: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether the command printed anything.
    pub fn has_output(&self) -> bool {
        !self.stdout.is_empty() || !self.stderr.is_empty()
    }
}

pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<ExecOutput, ExecError>> + Send + 'a>>;

pub type CacheFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<ExecOutput>, ExecError>> + Send + 'a>>;

/// Runs commands on the local machine.
pub trait LocalExecutor: Send + Sync {
    /// Run `cmd` to completion. A non-zero exit is reported through
    /// [`ExecOutput::exit_code`], not as an error.
    fn run<'a>(&'a self, cancel: &'a CancellationToken, cmd: &'a Cmd) -> ExecFuture<'a>;
}

/// Client for a remote execution service.
///
/// On success the command's outputs (including its depfile) have been
/// written to the build's HashFS.
pub trait RemoteExecutor: Send + Sync {
    /// Look the action up in the remote cache. `Ok(None)` is a miss.
    fn cache_lookup<'a>(&'a self, cancel: &'a CancellationToken, cmd: &'a Cmd) -> CacheFuture<'a>;

    /// Execute the action on a remote worker.
    fn run<'a>(&'a self, cancel: &'a CancellationToken, cmd: &'a Cmd) -> ExecFuture<'a>;
}
