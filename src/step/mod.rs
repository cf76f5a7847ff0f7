// src/step/mod.rs

//! Runtime wrapper around a [`StepDef`].
//!
//! The Plan creates one `Step` per resolved step definition. It carries the
//! phase marker, queue timestamps, the live [`Cmd`] once the builder has
//! created it, and the metrics accumulated while running.

pub mod cmd;
pub mod metrics;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::trace;

use crate::graph::{StepDef, Target};
use crate::types::ExecLocation;

pub use cmd::{Cmd, CmdPhase};
pub use metrics::StepMetrics;

/// Lifecycle of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// Waiting on at least one input target.
    Pending,
    /// All inputs satisfied; queued for a worker.
    Ready,
    /// Taken off the ready queue by a worker.
    Dispatched,
    Running(ExecLocation),
    /// Command finished; recording outputs and deps.
    OutputProcessing,
    Done,
    /// Failed, or blocked by a failed dependency.
    Failed,
}

#[derive(Debug)]
struct StepState {
    phase: StepPhase,
    ready_at: Option<Instant>,
    dispatched_at: Option<Instant>,
    cmd: Option<Cmd>,
    metrics: StepMetrics,
}

#[derive(Debug)]
pub struct Step {
    seq: usize,
    def: Arc<StepDef>,
    target: Target,
    created_at: Instant,
    state: Mutex<StepState>,
}

impl Step {
    pub(crate) fn new(seq: usize, def: Arc<StepDef>, target: Target) -> Self {
        Self {
            seq,
            def,
            target,
            created_at: Instant::now(),
            state: Mutex::new(StepState {
                phase: StepPhase::Pending,
                ready_at: None,
                dispatched_at: None,
                cmd: None,
                metrics: StepMetrics::default(),
            }),
        }
    }

    /// Position in which the Plan created this step.
    pub fn seq(&self) -> usize {
        self.seq
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn def(&self) -> &Arc<StepDef> {
        &self.def
    }

    /// The target the schedule walk resolved this step for.
    pub fn target(&self) -> Target {
        self.target
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn state(&self) -> MutexGuard<'_, StepState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> StepPhase {
        self.state().phase
    }

    pub fn set_phase(&self, phase: StepPhase) {
        let mut state = self.state();
        let now = Instant::now();
        match phase {
            StepPhase::Ready => state.ready_at = Some(now),
            StepPhase::Dispatched => {
                if let Some(ready_at) = state.ready_at {
                    state.metrics.queue = now.duration_since(ready_at);
                }
                state.dispatched_at = Some(now);
            }
            StepPhase::Done | StepPhase::Failed => {
                if let Some(dispatched_at) = state.dispatched_at {
                    state.metrics.run = now.duration_since(dispatched_at);
                }
            }
            _ => {}
        }
        trace!(step = %self.def.id, from = ?state.phase, to = ?phase, "step phase");
        state.phase = phase;
    }

    /// Snapshot of the command as last stored by the builder.
    pub fn cmd(&self) -> Option<Cmd> {
        self.state().cmd.clone()
    }

    pub fn set_cmd(&self, cmd: Cmd) {
        self.state().cmd = Some(cmd);
    }

    pub fn metrics(&self) -> StepMetrics {
        self.state().metrics.clone()
    }

    pub fn update_metrics(&self, f: impl FnOnce(&mut StepMetrics)) {
        f(&mut self.state().metrics);
    }
}
