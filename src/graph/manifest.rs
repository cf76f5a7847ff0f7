// src/graph/manifest.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::model::ConfigFile;
use crate::graph::{Graph, GraphError, StepDef, Target};
use crate::path::clean;

#[derive(Debug)]
struct ManifestStep {
    def: Arc<StepDef>,
    inputs: Vec<Target>,
}

/// [`Graph`] over a validated TOML manifest.
///
/// Every path mentioned by a step and every step name becomes a target. Step
/// names act as phony labels: listing one in `inputs` makes the consumer wait
/// for that step without adding a file input.
#[derive(Debug)]
pub struct ManifestGraph {
    names: Vec<String>,
    ids: HashMap<String, Target>,
    producers: HashMap<Target, usize>,
    steps: Vec<ManifestStep>,
    handed_out: Mutex<HashSet<usize>>,
    defaults: Vec<Target>,
    input_deps: HashMap<String, Vec<String>>,
    limits: HashMap<String, usize>,
}

impl ManifestGraph {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut graph = Self {
            names: Vec::new(),
            ids: HashMap::new(),
            producers: HashMap::new(),
            steps: Vec::new(),
            handed_out: Mutex::new(HashSet::new()),
            defaults: Vec::new(),
            input_deps: cfg
                .input_deps
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().map(|p| clean(p)).collect()))
                .collect(),
            limits: cfg
                .pool
                .iter()
                .map(|(name, pool)| (name.clone(), pool.depth))
                .collect(),
        };

        // First pass: labels and outputs, so inputs can refer to either.
        for (idx, (name, step)) in cfg.step.iter().enumerate() {
            let label = graph.intern(name);
            graph.producers.insert(label, idx);
            for out in step.outputs.iter() {
                let t = graph.intern(&clean(out));
                graph.producers.insert(t, idx);
            }
        }

        let mut consumed: HashSet<Target> = HashSet::new();

        for (name, step) in cfg.step.iter() {
            let mut inputs = Vec::new();
            let mut input_paths = Vec::new();
            for input in step.inputs.iter() {
                if cfg.step.contains_key(input) {
                    inputs.push(graph.intern(input));
                } else {
                    let path = clean(input);
                    inputs.push(graph.intern(&path));
                    input_paths.push(path);
                }
            }
            consumed.extend(inputs.iter().copied());

            let outputs: Vec<String> = step.outputs.iter().map(|p| clean(p)).collect();
            // The label goes last so waiters on it are released with the files.
            let mut outs: Vec<Target> = outputs.iter().map(|p| graph.intern(p)).collect();
            outs.push(graph.intern(name));
            let rule = step.rule.clone().unwrap_or_default();
            let description = step.description.clone().unwrap_or_else(|| {
                match outputs.first() {
                    Some(out) if !rule.is_empty() => format!("{rule} {out}"),
                    Some(out) => out.clone(),
                    None => name.clone(),
                }
            });

            let def = StepDef {
                id: name.clone(),
                rule,
                description,
                args: step.command.clone(),
                env: step
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                inputs: input_paths,
                tool_inputs: step.tool_inputs.iter().map(|p| clean(p)).collect(),
                outputs,
                outs,
                depfile: step.depfile.as_deref().map(clean),
                deps: step.deps,
                pool: step.pool.clone(),
                remote: step.remote,
                phony: step.is_phony(),
                bindings: Default::default(),
            };

            graph.steps.push(ManifestStep {
                def: Arc::new(def),
                inputs,
            });
        }

        graph.defaults = graph
            .steps
            .iter()
            .filter(|s| !s.def.outs.iter().any(|t| consumed.contains(t)))
            .filter_map(|s| s.def.outs.first().copied())
            .collect();

        graph
    }

    fn intern(&mut self, name: &str) -> Target {
        if let Some(t) = self.ids.get(name) {
            return *t;
        }
        let t = Target(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), t);
        t
    }

    /// Look up a target by path or label without resolving a step.
    pub fn lookup(&self, name: &str) -> Option<Target> {
        self.ids
            .get(name)
            .or_else(|| self.ids.get(&clean(name)))
            .copied()
    }
}

impl Graph for ManifestGraph {
    fn targets(&self, args: &[String]) -> Result<Vec<Target>, GraphError> {
        if args.is_empty() {
            return Ok(self.defaults.clone());
        }
        args.iter()
            .map(|arg| {
                self.lookup(arg)
                    .ok_or_else(|| GraphError::NoTarget(arg.clone()))
            })
            .collect()
    }

    fn target_path(&self, target: Target) -> Result<String, GraphError> {
        self.names
            .get(target.0 as usize)
            .cloned()
            .ok_or_else(|| GraphError::NoTarget(target.to_string()))
    }

    fn step_def(
        &self,
        target: Target,
        prev: Option<&StepDef>,
    ) -> Result<(Arc<StepDef>, Vec<Target>), GraphError> {
        let Some(&idx) = self.producers.get(&target) else {
            return match self.names.get(target.0 as usize) {
                Some(_) => Err(GraphError::TargetIsSource),
                None => Err(GraphError::NoTarget(target.to_string())),
            };
        };

        let mut handed_out = self.handed_out.lock().unwrap_or_else(|e| e.into_inner());
        if !handed_out.insert(idx) {
            return Err(GraphError::DuplicateStep);
        }

        let step = &self.steps[idx];
        debug!(
            step = %step.def.id,
            target = %self.names[target.0 as usize],
            requested_by = prev.map(|p| p.id.as_str()).unwrap_or("<root>"),
            "resolved step for target"
        );
        Ok((Arc::clone(&step.def), step.inputs.clone()))
    }

    fn input_deps(&self) -> HashMap<String, Vec<String>> {
        self.input_deps.clone()
    }

    fn step_limits(&self) -> HashMap<String, usize> {
        self.limits.clone()
    }
}
