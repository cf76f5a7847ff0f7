#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use siso::exec::{CacheFuture, ExecError, ExecFuture, ExecOutput, LocalExecutor, RemoteExecutor};
use siso::graph::{Graph, GraphError, StepDef, Target};
use siso::hashfs::MemHashFs;
use siso::step::Cmd;
use tokio_util::sync::CancellationToken;

/// Writes every output (and the depfile, if scripted) of `cmd` into `fs`.
fn materialize(fs: &MemHashFs, cmd: &Cmd, depfiles: &HashMap<String, String>) {
    for out in cmd.outputs() {
        fs.add_file(out, format!("built by {}", cmd.id()));
    }
    if let (Some(path), Some(content)) = (cmd.depfile(), depfiles.get(cmd.id())) {
        fs.add_file(path, content.clone());
    }
}

/// What a fake executor does for one step.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Write outputs, exit 0.
    Success,
    /// Write outputs, exit 0, print this on stdout.
    Stdout(String),
    /// Write nothing, exit 0.
    NoOutputs,
    /// Write nothing, exit with this code.
    Exit(i32),
    /// Return this error.
    Error(ExecError),
}

#[derive(Default)]
struct Script {
    outcomes: HashMap<String, VecDeque<Outcome>>,
    depfiles: HashMap<String, String>,
    runs: Vec<Cmd>,
}

impl Script {
    fn next_outcome(&mut self, id: &str) -> Outcome {
        self.outcomes
            .get_mut(id)
            .and_then(|q| q.pop_front())
            .unwrap_or(Outcome::Success)
    }
}

fn apply(fs: &MemHashFs, cmd: &Cmd, outcome: Outcome, depfiles: &HashMap<String, String>) -> Result<ExecOutput, ExecError> {
    match outcome {
        Outcome::Success => {
            materialize(fs, cmd, depfiles);
            Ok(ExecOutput::default())
        }
        Outcome::Stdout(text) => {
            materialize(fs, cmd, depfiles);
            Ok(ExecOutput {
                stdout: text.into_bytes(),
                ..Default::default()
            })
        }
        Outcome::NoOutputs => Ok(ExecOutput::default()),
        Outcome::Exit(code) => Ok(ExecOutput {
            exit_code: code,
            stderr: b"fake failure\n".to_vec(),
            ..Default::default()
        }),
        Outcome::Error(err) => Err(err),
    }
}

/// A fake local executor that:
/// - records every command it was asked to run
/// - materialises outputs in a `MemHashFs`
/// - follows per-step scripted outcomes (default: success)
#[derive(Clone)]
pub struct FakeLocal {
    fs: MemHashFs,
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl FakeLocal {
    pub fn new(fs: MemHashFs) -> Self {
        Self {
            fs,
            script: Arc::new(Mutex::new(Script::default())),
            delay: None,
        }
    }

    /// Sleep this long inside every run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue an outcome for the next run of `step`.
    pub fn script(&self, step: &str, outcome: Outcome) {
        let mut script = self.script.lock().unwrap();
        script.outcomes.entry(step.to_string()).or_default().push_back(outcome);
    }

    /// Depfile content written when `step` succeeds.
    pub fn depfile(&self, step: &str, content: &str) {
        let mut script = self.script.lock().unwrap();
        script.depfiles.insert(step.to_string(), content.to_string());
    }

    pub fn runs(&self) -> Vec<Cmd> {
        self.script.lock().unwrap().runs.clone()
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.runs().iter().map(|c| c.id().to_string()).collect()
    }
}

impl LocalExecutor for FakeLocal {
    fn run<'a>(&'a self, cancel: &'a CancellationToken, cmd: &'a Cmd) -> ExecFuture<'a> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExecError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(ExecError::Canceled);
            }
            let (outcome, depfiles) = {
                let mut script = self.script.lock().unwrap();
                script.runs.push(cmd.clone());
                (script.next_outcome(cmd.id()), script.depfiles.clone())
            };
            apply(&self.fs, cmd, outcome, &depfiles)
        })
    }
}

/// A fake remote executor with a scripted action cache and scripted run
/// outcomes. Successful runs and cache hits materialise outputs in the
/// shared `MemHashFs`, the way a real client downloads them.
#[derive(Clone)]
pub struct FakeRemote {
    fs: MemHashFs,
    script: Arc<Mutex<Script>>,
    cached: Arc<Mutex<HashSet<String>>>,
    lookups: Arc<Mutex<Vec<String>>>,
}

impl FakeRemote {
    pub fn new(fs: MemHashFs) -> Self {
        Self {
            fs,
            script: Arc::new(Mutex::new(Script::default())),
            cached: Arc::new(Mutex::new(HashSet::new())),
            lookups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn script(&self, step: &str, outcome: Outcome) {
        let mut script = self.script.lock().unwrap();
        script.outcomes.entry(step.to_string()).or_default().push_back(outcome);
    }

    pub fn depfile(&self, step: &str, content: &str) {
        let mut script = self.script.lock().unwrap();
        script.depfiles.insert(step.to_string(), content.to_string());
    }

    /// Make the cache answer for `step`.
    pub fn cache_hit(&self, step: &str) {
        self.cached.lock().unwrap().insert(step.to_string());
    }

    pub fn runs(&self) -> Vec<Cmd> {
        self.script.lock().unwrap().runs.clone()
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.runs().iter().map(|c| c.id().to_string()).collect()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

impl RemoteExecutor for FakeRemote {
    fn cache_lookup<'a>(&'a self, cancel: &'a CancellationToken, cmd: &'a Cmd) -> CacheFuture<'a> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(ExecError::Canceled);
            }
            self.lookups.lock().unwrap().push(cmd.id().to_string());
            if !self.cached.lock().unwrap().contains(cmd.id()) {
                return Ok(None);
            }
            let depfiles = self.script.lock().unwrap().depfiles.clone();
            materialize(&self.fs, cmd, &depfiles);
            Ok(Some(ExecOutput {
                cached: true,
                ..Default::default()
            }))
        })
    }

    fn run<'a>(&'a self, cancel: &'a CancellationToken, cmd: &'a Cmd) -> ExecFuture<'a> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(ExecError::Canceled);
            }
            let (outcome, depfiles) = {
                let mut script = self.script.lock().unwrap();
                script.runs.push(cmd.clone());
                (script.next_outcome(cmd.id()), script.depfiles.clone())
            };
            apply(&self.fs, cmd, outcome, &depfiles)
        })
    }
}

/// Wraps a graph and counts `step_def` calls per target.
pub struct CountingGraph<G> {
    inner: G,
    calls: Mutex<HashMap<Target, usize>>,
    resolved: Mutex<Vec<String>>,
}

impl<G: Graph> CountingGraph<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            resolved: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn calls_for(&self, target: Target) -> usize {
        self.calls.lock().unwrap().get(&target).copied().unwrap_or(0)
    }

    /// Ids of the step definitions handed out, in order.
    pub fn resolved(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }
}

impl<G: Graph> Graph for CountingGraph<G> {
    fn targets(&self, args: &[String]) -> Result<Vec<Target>, GraphError> {
        self.inner.targets(args)
    }

    fn target_path(&self, target: Target) -> Result<String, GraphError> {
        self.inner.target_path(target)
    }

    fn step_def(
        &self,
        target: Target,
        prev: Option<&StepDef>,
    ) -> Result<(Arc<StepDef>, Vec<Target>), GraphError> {
        *self.calls.lock().unwrap().entry(target).or_default() += 1;
        let res = self.inner.step_def(target, prev);
        if let Ok((def, _)) = &res {
            self.resolved.lock().unwrap().push(def.id.clone());
        }
        res
    }

    fn input_deps(&self) -> HashMap<String, Vec<String>> {
        self.inner.input_deps()
    }

    fn step_limits(&self) -> HashMap<String, usize> {
        self.inner.step_limits()
    }
}
