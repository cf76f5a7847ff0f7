// src/step/cmd.rs

//! Execution request for one step.
//!
//! A `Cmd` is never mutated in place. Each enrichment (tool inputs from the
//! include scan, tree inputs, extra outputs) consumes the value and returns a
//! new one tagged with the phase it reached, so a command handed to an
//! executor can't change underneath it.

use std::collections::{HashMap, HashSet};

use blake3::Hasher;

use crate::deps::DepsMode;
use crate::graph::StepDef;

/// How far a command has been enriched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CmdPhase {
    /// Straight from the step definition.
    Declared,
    /// Tool inputs (label expansions, logged or scanned deps) appended.
    ToolInputs,
    /// Inputs deduplicated and ready to ship to an executor.
    Preprocessed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    phase: CmdPhase,
    id: String,
    desc: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    dir: String,
    inputs: Vec<String>,
    tool_inputs: Vec<String>,
    tree_inputs: Vec<String>,
    outputs: Vec<String>,
    depfile: Option<String>,
    deps: DepsMode,
    pool: Option<String>,
    remote: bool,
}

impl Cmd {
    /// Build the declared command for `def`, run in `dir` (exec-root relative).
    pub fn from_step_def(def: &StepDef, dir: &str) -> Self {
        Self {
            phase: CmdPhase::Declared,
            id: def.id.clone(),
            desc: def.description.clone(),
            args: def.args.clone(),
            env: def.env.clone(),
            dir: dir.to_string(),
            inputs: def.inputs.clone(),
            tool_inputs: def.tool_inputs.clone(),
            tree_inputs: Vec::new(),
            outputs: def.outputs.clone(),
            depfile: def.depfile.clone(),
            deps: def.deps,
            pool: def.pool.clone(),
            remote: def.remote,
        }
    }

    pub fn phase(&self) -> CmdPhase {
        self.phase
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn tool_inputs(&self) -> &[String] {
        &self.tool_inputs
    }

    pub fn tree_inputs(&self) -> &[String] {
        &self.tree_inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn depfile(&self) -> Option<&str> {
        self.depfile.as_deref()
    }

    pub fn deps(&self) -> DepsMode {
        self.deps
    }

    pub fn pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    pub fn remote_allowed(&self) -> bool {
        self.remote
    }

    /// Whether `flag` appears verbatim after the program name. Joined values
    /// (`-gsplit-dwarf=single`) don't count.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().skip(1).any(|a| a == flag)
    }

    /// Declared and tool inputs, first occurrence wins.
    pub fn all_inputs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.inputs
            .iter()
            .chain(self.tool_inputs.iter())
            .filter(|p| seen.insert(p.as_str()))
            .cloned()
            .collect()
    }

    /// Outputs a remote worker must hand back, including the depfile.
    pub fn remote_outputs(&self) -> Vec<String> {
        let mut outs = self.outputs.clone();
        if let Some(depfile) = &self.depfile {
            if !outs.contains(depfile) {
                outs.push(depfile.clone());
            }
        }
        outs
    }

    /// Digest of what the command does (argv, env, working dir). Inputs are
    /// left out and checked separately by mtime.
    pub fn cmd_hash(&self) -> String {
        let mut hasher = Hasher::new();
        hasher.update(self.dir.as_bytes());
        hasher.update(&[0]);
        for arg in self.args.iter() {
            hasher.update(arg.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&[1]);
        for (k, v) in self.env.iter() {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn with_tool_inputs<I>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        append_unique(&mut self.tool_inputs, extra);
        self.phase = self.phase.max(CmdPhase::ToolInputs);
        self
    }

    /// Replace input labels with the paths they stand for, transitively.
    /// Labels cycling back to themselves expand to nothing further.
    pub fn expand_labels(mut self, input_deps: &HashMap<String, Vec<String>>) -> Self {
        if input_deps.is_empty() {
            return self;
        }
        let has_label = self
            .inputs
            .iter()
            .chain(self.tool_inputs.iter())
            .any(|p| input_deps.contains_key(p));
        if !has_label {
            return self;
        }
        self.inputs = expand_list(&self.inputs, input_deps);
        self.tool_inputs = expand_list(&self.tool_inputs, input_deps);
        self.phase = self.phase.max(CmdPhase::ToolInputs);
        self
    }

    pub fn with_tree_inputs<I>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        append_unique(&mut self.tree_inputs, extra);
        self.phase = self.phase.max(CmdPhase::ToolInputs);
        self
    }

    pub fn with_outputs<I>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        append_unique(&mut self.outputs, extra);
        self
    }

    /// Drop tool inputs already declared as inputs and mark the command ready
    /// for execution.
    pub fn preprocessed(mut self) -> Self {
        let declared: HashSet<String> = self.inputs.iter().cloned().collect();
        let mut seen = HashSet::new();
        self.tool_inputs
            .retain(|p| !declared.contains(p) && seen.insert(p.clone()));
        self.phase = CmdPhase::Preprocessed;
        self
    }
}

fn expand_list(list: &[String], input_deps: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<&String> = list.iter().rev().collect();
    let mut expanded: HashSet<&str> = HashSet::new();

    while let Some(item) = stack.pop() {
        match input_deps.get(item) {
            Some(paths) => {
                if expanded.insert(item.as_str()) {
                    stack.extend(paths.iter().rev());
                }
            }
            None => {
                if seen.insert(item.clone()) {
                    out.push(item.clone());
                }
            }
        }
    }
    out
}

fn append_unique<I>(list: &mut Vec<String>, extra: I)
where
    I: IntoIterator<Item = String>,
{
    let mut seen: HashSet<String> = list.iter().cloned().collect();
    for item in extra {
        if seen.insert(item.clone()) {
            list.push(item);
        }
    }
}
