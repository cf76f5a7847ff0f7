// src/deps/mod.rs

//! Dependency discovery for compile-like steps.
//!
//! Before execution the include scanner adds the headers, include dirs and
//! sysroots a compile may touch, so a remote worker gets everything it needs.
//! After execution the compiler's own report (depfile for gcc, showIncludes
//! for msvc) is the authoritative deps list recorded for the next build.

pub mod depfile;
pub mod depslog;
pub mod gcc;
pub mod msvc;
pub mod scandeps;

use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::hashfs::HashFs;
use crate::path::ExecPaths;
use crate::step::Cmd;

pub use depslog::{DepsLogStore, DepsRecord};
pub use scandeps::{ScanError, ScanRequest, ScanResult, Scanner};

/// How a step reports the files it actually read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepsMode {
    #[default]
    None,
    /// Make-rule depfile written by `-MD`/`-MMD`.
    Gcc,
    /// `/showIncludes` notes on stdout.
    Msvc,
}

impl FromStr for DepsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(DepsMode::None),
            "gcc" => Ok(DepsMode::Gcc),
            "msvc" => Ok(DepsMode::Msvc),
            other => Err(format!(
                "invalid deps mode: {other} (expected \"none\", \"gcc\" or \"msvc\")"
            )),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DepsError {
    #[error("dependency discovery canceled")]
    Canceled,

    /// The compiler's deps report could not be read or parsed. Incremental
    /// builds depending on this step would be unsound.
    #[error("missing deps in {path}: {reason}")]
    MissingDeps { path: String, reason: String },

    #[error("source file not found: {0}")]
    MissingSource(String),

    #[error("deps scan failed: {0}")]
    Scan(String),

    #[error("deps log: {0}")]
    Log(String),
}

impl From<ScanError> for DepsError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Canceled => DepsError::Canceled,
            ScanError::MissingSource(path) => DepsError::MissingSource(path),
        }
    }
}

/// Deps reported by a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredDeps {
    /// Exec-root relative paths.
    pub deps: Vec<String>,
    /// Stdout with deps notes removed (only differs for msvc).
    pub stdout: Vec<u8>,
}

#[derive(Debug)]
pub struct DepsDiscoverer {
    hashfs: Arc<dyn HashFs>,
    paths: Arc<ExecPaths>,
    scanner: Arc<Scanner>,
    scan_sem: Semaphore,
}

impl DepsDiscoverer {
    pub fn new(hashfs: Arc<dyn HashFs>, paths: Arc<ExecPaths>, scan_limit: usize) -> Self {
        Self {
            scanner: Arc::new(Scanner::new(Arc::clone(&hashfs))),
            hashfs,
            paths,
            scan_sem: Semaphore::new(scan_limit.max(1)),
        }
    }

    /// Declare outputs the compiler writes implicitly (`.dwo` for split DWARF).
    pub fn fix_outputs(&self, cmd: Cmd) -> Cmd {
        gcc::fix_outputs_for_split_dwarf(cmd)
    }

    /// Run the include scanner and append what it found to the command.
    ///
    /// The scan reads and hashes files, so it runs on the blocking pool.
    /// Commands without a deps mode are returned untouched.
    pub async fn scan(&self, cancel: &CancellationToken, cmd: Cmd) -> Result<Cmd, DepsError> {
        if cmd.deps() == DepsMode::None {
            return Ok(cmd);
        }

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(DepsError::Canceled),
            permit = self.scan_sem.acquire() => permit.map_err(|_| DepsError::Canceled)?,
        };

        let req = gcc::scan_request(&cmd, &self.paths);
        if req.sources.is_empty() {
            return Err(DepsError::Scan(format!("no source file in command for {}", cmd.id())));
        }
        let scanner = Arc::clone(&self.scanner);
        let scan_cancel = cancel.clone();
        let res = tokio::task::spawn_blocking(move || scanner.scan(&scan_cancel, &req))
            .await
            .map_err(|e| DepsError::Scan(format!("scan task for {} failed: {e}", cmd.id())))??;

        debug!(
            step = %cmd.id(),
            files = res.files.len(),
            dirs = res.dirs.len(),
            sysroots = res.sysroots.len(),
            "scanned deps"
        );

        Ok(cmd
            .with_tool_inputs(res.files)
            .with_tree_inputs(res.dirs.into_iter().chain(res.sysroots)))
    }

    /// Collect the deps a finished command reported.
    pub fn after_run(&self, cmd: &Cmd, stdout: &[u8]) -> Result<DiscoveredDeps, DepsError> {
        match cmd.deps() {
            DepsMode::None => Ok(DiscoveredDeps {
                deps: Vec::new(),
                stdout: stdout.to_vec(),
            }),
            DepsMode::Gcc => Ok(DiscoveredDeps {
                deps: gcc::deps_after_run(self.hashfs.as_ref(), &self.paths, cmd)?,
                stdout: stdout.to_vec(),
            }),
            DepsMode::Msvc => {
                let (raw, rest) = msvc::parse_show_includes(stdout);
                let deps = raw
                    .iter()
                    .map(|p| self.paths.maybe_from_wd(p).to_string())
                    .collect();
                Ok(DiscoveredDeps { deps, stdout: rest })
            }
        }
    }
}
