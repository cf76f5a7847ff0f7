// src/plan/schedule.rs

//! Walk requested targets through the [`Graph`] and fill the [`Plan`].

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{Result, SisoError};
use crate::graph::{Graph, GraphError, StepDef, Target};
use crate::hashfs::HashFs;
use crate::plan::Plan;

/// What the schedule walk found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    /// Requested root targets.
    pub targets: usize,
    /// Steps added to the plan.
    pub steps: usize,
    /// Targets marked as existing sources.
    pub sources: usize,
}

/// Resolve `args` (empty = default targets) and add every step needed to
/// build them to `plan`, then let the plan close once the work drains.
///
/// On error the plan is left open; the caller must not start workers on it.
pub fn schedule(
    plan: &Plan,
    graph: &dyn Graph,
    hashfs: &dyn HashFs,
    cancel: &CancellationToken,
    args: &[String],
) -> Result<ScheduleSummary> {
    let targets = graph.targets(args)?;

    let mut walker = Walker {
        plan,
        graph,
        hashfs,
        cancel,
        visiting: HashSet::new(),
        scheduled: HashSet::new(),
        summary: ScheduleSummary {
            targets: targets.len(),
            ..Default::default()
        },
    };

    for target in targets {
        walker.schedule_target(target, None)?;
    }

    let summary = walker.summary;
    info!(
        targets = summary.targets,
        steps = summary.steps,
        sources = summary.sources,
        "schedule complete"
    );
    plan.finish_scheduling();
    Ok(summary)
}

struct Walker<'a> {
    plan: &'a Plan,
    graph: &'a dyn Graph,
    hashfs: &'a dyn HashFs,
    cancel: &'a CancellationToken,
    /// Outputs of steps whose inputs are still being resolved.
    visiting: HashSet<Target>,
    /// Outputs of steps already added to the plan.
    scheduled: HashSet<Target>,
    summary: ScheduleSummary,
}

impl Walker<'_> {
    fn schedule_target(&mut self, target: Target, prev: Option<&StepDef>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SisoError::Canceled);
        }
        if self.scheduled.contains(&target) || self.plan.is_marked(target) {
            return Ok(());
        }
        if self.visiting.contains(&target) {
            let path = self.graph.target_path(target)?;
            return Err(SisoError::GraphCycle(format!("{path} depends on itself")));
        }

        let (def, inputs) = match self.graph.step_def(target, prev) {
            Ok(found) => found,
            Err(GraphError::TargetIsSource) => return self.mark_source(target),
            Err(GraphError::DuplicateStep) => {
                debug!(target = %target, "step already scheduled via another path");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        self.visiting.insert(target);
        self.visiting.extend(def.outs.iter().copied());

        for input in inputs.iter() {
            if self.cancel.is_cancelled() {
                return Err(SisoError::Canceled);
            }
            self.schedule_target(*input, Some(def.as_ref()))?;
        }

        for out in def.outs.iter().chain(std::iter::once(&target)) {
            self.visiting.remove(out);
            self.scheduled.insert(*out);
        }

        let waits: Vec<Target> = inputs
            .into_iter()
            .filter(|t| !self.plan.is_marked(*t))
            .collect();
        debug!(step = %def.id, waits = waits.len(), "adding step");
        self.plan.add(def, target, waits);
        self.summary.steps += 1;
        Ok(())
    }

    fn mark_source(&mut self, target: Target) -> Result<()> {
        let path = self.graph.target_path(target)?;
        match self.hashfs.stat(&path) {
            Ok(_) => {
                self.plan.mark(target);
                self.summary.sources += 1;
                Ok(())
            }
            Err(err) if err.is_not_found() => Err(SisoError::MissingSource(path)),
            Err(err) => Err(err.into()),
        }
    }
}
