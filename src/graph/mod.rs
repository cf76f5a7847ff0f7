// src/graph/mod.rs

//! Build graph collaborator.
//!
//! The scheduler only talks to the graph through the [`Graph`] trait. A
//! TOML-backed implementation lives in [`manifest`].

pub mod manifest;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::deps::DepsMode;

pub use manifest::ManifestGraph;

/// Opaque, comparable identifier of a graph node (file path or phony label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(pub u32);

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors reported by [`Graph::step_def`] and friends.
///
/// `TargetIsSource` and `DuplicateStep` are control-flow signals for the
/// schedule walk; only `NoTarget` and `Other` are real failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("no target {0:?}")]
    NoTarget(String),

    #[error("target is a source")]
    TargetIsSource,

    #[error("step already produced for this target")]
    DuplicateStep,

    #[error("graph error: {0}")]
    Other(String),
}

/// Immutable description of one build action, as produced by the graph.
///
/// All paths are exec-root relative; `args` are interpreted in the build's
/// working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepDef {
    /// Unique step name.
    pub id: String,
    pub rule: String,
    pub description: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub inputs: Vec<String>,
    /// Inputs the tool itself needs (compiler binaries, sysroot labels).
    pub tool_inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Targets for `outputs`, in the same order, then the step's own label.
    /// Finishing the step completes every one of them.
    pub outs: Vec<Target>,
    pub depfile: Option<String>,
    pub deps: DepsMode,
    pub pool: Option<String>,
    /// Whether the step may run on remote workers.
    pub remote: bool,
    /// Phony steps have no command and complete immediately.
    pub phony: bool,
    pub bindings: BTreeMap<String, String>,
}

/// Narrow interface the scheduler uses to walk the build graph.
pub trait Graph: Send + Sync {
    /// Resolve command-line target names (paths or labels). An empty slice
    /// means the default targets.
    fn targets(&self, args: &[String]) -> Result<Vec<Target>, GraphError>;

    /// Exec-root relative path (or label) of a target.
    fn target_path(&self, target: Target) -> Result<String, GraphError>;

    /// The step producing `target` and the targets it depends on.
    ///
    /// `prev` is the step that asked for `target`, if any. Returns
    /// [`GraphError::DuplicateStep`] when the step was already handed out for
    /// another of its outputs or another consumer.
    fn step_def(
        &self,
        target: Target,
        prev: Option<&StepDef>,
    ) -> Result<(Arc<StepDef>, Vec<Target>), GraphError>;

    /// Label -> paths expansion used for tool inputs.
    fn input_deps(&self) -> HashMap<String, Vec<String>>;

    /// Pool name -> max concurrency.
    fn step_limits(&self) -> HashMap<String, usize>;
}
