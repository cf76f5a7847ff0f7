// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::deps::DepsMode;
use crate::types::DepsLogMode;

/// Top-level build manifest as read from a TOML file.
///
/// ```toml
/// [config]
/// dir = "out/Default"
/// parallelism = 8
///
/// [pool.link]
/// depth = 2
///
/// [step.compile_foo]
/// command = ["clang++", "-c", "../../src/foo.cc", "-o", "obj/foo.o"]
/// inputs = ["src/foo.cc"]
/// outputs = ["out/Default/obj/foo.o"]
/// ```
///
/// This is the unvalidated form; convert it with `ConfigFile::try_from`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Build options from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Concurrency pools from `[pool.<name>]`.
    #[serde(default)]
    pub pool: BTreeMap<String, PoolConfig>,

    /// Label expansions from `[input_deps]`.
    #[serde(default)]
    pub input_deps: BTreeMap<String, Vec<String>>,

    /// All steps from `[step.<name>]`.
    #[serde(default)]
    pub step: BTreeMap<String, StepConfig>,
}

/// Validated build manifest.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub pool: BTreeMap<String, PoolConfig>,
    pub input_deps: BTreeMap<String, Vec<String>>,
    pub step: BTreeMap<String, StepConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            pool: raw.pool,
            input_deps: raw.input_deps,
            step: raw.step,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Root every graph path is relative to. Relative values are resolved
    /// against the manifest's directory.
    #[serde(default = "default_exec_root")]
    pub exec_root: String,

    /// Working directory of commands, relative to `exec_root`.
    #[serde(default = "default_dir")]
    pub dir: String,

    /// Number of worker tasks pulling from the ready queue.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Capacity of the bounded ready channel.
    #[serde(default = "default_ready_queue_capacity")]
    pub ready_queue_capacity: usize,

    /// Use remote execution for steps that allow it.
    #[serde(default)]
    pub remote: bool,

    #[serde(default = "default_remote_limit")]
    pub remote_limit: usize,

    #[serde(default = "default_parallelism")]
    pub preproc_limit: usize,

    #[serde(default = "default_parallelism")]
    pub scan_limit: usize,

    /// Stop scheduling new work after this many failures (0 = never).
    #[serde(default = "default_keep_going")]
    pub keep_going: usize,

    /// Never re-run a remotely failed step locally.
    #[serde(default)]
    pub no_fallback: bool,

    /// Fail steps that print anything on stdout or stderr.
    #[serde(default)]
    pub fail_on_stdouterr: bool,

    /// Allow speculative runs with deps recorded by a previous build.
    #[serde(default = "default_true")]
    pub fast_deps: bool,

    /// Fail a step when its deps can't be updated after it ran.
    #[serde(default)]
    pub strict_deps: bool,

    #[serde(default)]
    pub deps_log: DepsLogMode,

    /// How long a finished step waits for its deps update before detaching it.
    #[serde(default = "default_deps_update_timeout_ms")]
    pub deps_update_timeout_ms: u64,
}

fn default_exec_root() -> String {
    ".".to_string()
}

fn default_dir() -> String {
    ".".to_string()
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_ready_queue_capacity() -> usize {
    64
}

fn default_remote_limit() -> usize {
    32
}

fn default_keep_going() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_deps_update_timeout_ms() -> u64 {
    5000
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            exec_root: default_exec_root(),
            dir: default_dir(),
            parallelism: default_parallelism(),
            ready_queue_capacity: default_ready_queue_capacity(),
            remote: false,
            remote_limit: default_remote_limit(),
            preproc_limit: default_parallelism(),
            scan_limit: default_parallelism(),
            keep_going: default_keep_going(),
            no_fallback: false,
            fail_on_stdouterr: false,
            fast_deps: true,
            strict_deps: false,
            deps_log: DepsLogMode::default(),
            deps_update_timeout_ms: default_deps_update_timeout_ms(),
        }
    }
}

/// `[pool.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub depth: usize,
}

/// `[step.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub rule: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Argument vector, run in `config.dir`. Empty means phony.
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Exec-root relative input paths, or names of other steps.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Inputs the tool needs that are not build dependencies.
    #[serde(default)]
    pub tool_inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub depfile: Option<String>,

    #[serde(default)]
    pub deps: DepsMode,

    #[serde(default)]
    pub pool: Option<String>,

    #[serde(default)]
    pub remote: bool,

    #[serde(default)]
    pub phony: bool,
}

impl StepConfig {
    pub fn is_phony(&self) -> bool {
        self.phony || self.command.is_empty()
    }
}
