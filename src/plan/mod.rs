// src/plan/mod.rs

//! Scheduling state for one build.
//!
//! The Plan owns every step between creation and completion:
//!
//! - steps with unresolved inputs sit in `waits`, indexed by the targets they
//!   are blocked on;
//! - steps with no unresolved inputs go to the bounded ready channel, or to
//!   the overflow queue when the channel is full;
//! - workers take steps with [`Plan::next`] and report back with
//!   [`Plan::done`] or [`Plan::fail`].
//!
//! All state sits behind one mutex and no operation blocks while holding it:
//! channel pushes use `try_send` and spill into the overflow.
//!
//! The ready channel is closed exactly once, when scheduling has finished and
//! every added step has either completed or failed. Workers see the closed
//! channel as the end of the build.

pub mod schedule;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::graph::{StepDef, Target};
use crate::step::{Step, StepPhase};

pub use schedule::{schedule, ScheduleSummary};

/// Point-in-time counters, mostly for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Steps ever added.
    pub added: usize,
    /// Steps blocked on at least one target.
    pub pending: usize,
    /// Steps ready but parked because the channel was full.
    pub overflow: usize,
    /// Steps not yet done or failed.
    pub remaining: usize,
    pub done: usize,
    /// Failed steps, including those blocked by a failed dependency.
    pub failed: usize,
    pub closed: bool,
}

struct PlanState {
    tx: Option<mpsc::Sender<Arc<Step>>>,
    overflow: VecDeque<Arc<Step>>,
    waits: HashMap<Target, Vec<Arc<Step>>>,
    /// Unresolved wait count per pending step, keyed by `Step::seq`.
    wait_counts: HashMap<usize, usize>,
    marked: HashSet<Target>,
    done_targets: HashSet<Target>,
    failed_targets: HashSet<Target>,
    added: usize,
    pending: usize,
    remaining: usize,
    done: usize,
    failed: usize,
    scheduling_done: bool,
    closed: bool,
}

pub struct Plan {
    state: Mutex<PlanState>,
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<Arc<Step>>>,
    next_seq: AtomicUsize,
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan").field("stats", &self.stats()).finish()
    }
}

impl Plan {
    /// Create a plan whose ready channel holds at most `capacity` steps.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            state: Mutex::new(PlanState {
                tx: Some(tx),
                overflow: VecDeque::new(),
                waits: HashMap::new(),
                wait_counts: HashMap::new(),
                marked: HashSet::new(),
                done_targets: HashSet::new(),
                failed_targets: HashSet::new(),
                added: 0,
                pending: 0,
                remaining: 0,
                done: 0,
                failed: 0,
                scheduling_done: false,
                closed: false,
            }),
            ready_rx: tokio::sync::Mutex::new(rx),
            next_seq: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlanState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `target` as a pre-existing source. Marking twice is a no-op.
    pub fn mark(&self, target: Target) {
        self.lock().marked.insert(target);
    }

    pub fn is_marked(&self, target: Target) -> bool {
        self.lock().marked.contains(&target)
    }

    /// Register a step for `def`, blocked on `waits`.
    ///
    /// Waits on marked sources or already completed targets are dropped. A
    /// step with nothing left to wait for is ready immediately. A step
    /// waiting on a failed target is failed on the spot.
    pub fn add(&self, def: Arc<StepDef>, target: Target, waits: Vec<Target>) -> Arc<Step> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let step = Arc::new(Step::new(seq, def, target));

        let mut state = self.lock();
        state.added += 1;

        let mut seen = HashSet::new();
        let waits: Vec<Target> = waits
            .into_iter()
            .filter(|t| !state.marked.contains(t) && !state.done_targets.contains(t))
            .filter(|t| seen.insert(*t))
            .collect();

        if waits.iter().any(|t| state.failed_targets.contains(t)) {
            debug!(step = %step.id(), "dependency already failed; not scheduling");
            step.set_phase(StepPhase::Failed);
            state.failed += 1;
            let outs = step.def().outs.clone();
            state.failed_targets.extend(outs);
            return step;
        }

        state.remaining += 1;

        if waits.is_empty() {
            trace!(step = %step.id(), "added ready");
            step.set_phase(StepPhase::Ready);
            push_ready_locked(&mut state, Arc::clone(&step));
        } else {
            trace!(step = %step.id(), waits = waits.len(), "added pending");
            state.pending += 1;
            state.wait_counts.insert(seq, waits.len());
            for t in waits {
                state.waits.entry(t).or_default().push(Arc::clone(&step));
            }
        }

        step
    }

    /// Signal that no more steps will be added. The Plan may close as soon
    /// as this is called.
    pub fn finish_scheduling(&self) {
        let mut state = self.lock();
        state.scheduling_done = true;
        debug!(
            added = state.added,
            pending = state.pending,
            remaining = state.remaining,
            "scheduling finished"
        );
        maybe_close_locked(&mut state);
    }

    /// Mark `step` done and release steps that were waiting on its outputs.
    pub fn done(&self, step: &Step) {
        step.set_phase(StepPhase::Done);

        let mut state = self.lock();
        state.remaining = state.remaining.saturating_sub(1);
        state.done += 1;

        for out in step.def().outs.iter() {
            state.done_targets.insert(*out);
            let Some(waiters) = state.waits.remove(out) else {
                continue;
            };
            for waiter in waiters {
                // Already removed by a failure elsewhere.
                let Some(left) = state.wait_counts.get_mut(&waiter.seq()) else {
                    continue;
                };
                *left -= 1;
                if *left == 0 {
                    state.wait_counts.remove(&waiter.seq());
                    state.pending -= 1;
                    trace!(step = %waiter.id(), after = %step.id(), "step ready");
                    waiter.set_phase(StepPhase::Ready);
                    push_ready_locked(&mut state, waiter);
                }
            }
        }

        drain_overflow_locked(&mut state);
        maybe_close_locked(&mut state);
    }

    /// Mark `step` failed and fail every step transitively blocked on it.
    ///
    /// Returns the dependents failed along the way (not including `step`).
    pub fn fail(&self, step: &Step) -> Vec<Arc<Step>> {
        step.set_phase(StepPhase::Failed);

        let mut state = self.lock();
        state.remaining = state.remaining.saturating_sub(1);
        state.failed += 1;

        let mut stack: Vec<Target> = step.def().outs.clone();
        let mut newly_failed = Vec::new();

        while let Some(t) = stack.pop() {
            state.failed_targets.insert(t);
            let Some(waiters) = state.waits.remove(&t) else {
                continue;
            };
            for waiter in waiters {
                if state.wait_counts.remove(&waiter.seq()).is_none() {
                    continue;
                }
                state.pending -= 1;
                state.remaining = state.remaining.saturating_sub(1);
                state.failed += 1;
                debug!(
                    step = %waiter.id(),
                    failed = %step.id(),
                    "marking dependent as failed due to upstream failure"
                );
                waiter.set_phase(StepPhase::Failed);
                stack.extend(waiter.def().outs.iter().copied());
                newly_failed.push(waiter);
            }
        }

        maybe_close_locked(&mut state);
        newly_failed
    }

    /// Move overflow into the ready channel while it has room.
    pub fn push_ready(&self) {
        let mut state = self.lock();
        drain_overflow_locked(&mut state);
    }

    /// Wait for the next ready step.
    ///
    /// Returns `None` once the Plan is closed and drained, or when `cancel`
    /// fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<Arc<Step>> {
        let step = {
            let mut rx = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                rx = self.ready_rx.lock() => rx,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                step = rx.recv() => step,
            }
        };

        if let Some(step) = &step {
            step.set_phase(StepPhase::Dispatched);
        }
        self.push_ready();
        step
    }

    /// Non-blocking [`Plan::next`]. `None` means nothing is ready right now
    /// (or the Plan is closed; check [`Plan::is_closed`]).
    pub fn try_next(&self) -> Option<Arc<Step>> {
        let step = {
            let mut rx = self.ready_rx.try_lock().ok()?;
            match rx.try_recv() {
                Ok(step) => Some(step),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
            }
        };

        if let Some(step) = &step {
            step.set_phase(StepPhase::Dispatched);
        }
        self.push_ready();
        step
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn stats(&self) -> PlanStats {
        let state = self.lock();
        PlanStats {
            added: state.added,
            pending: state.pending,
            overflow: state.overflow.len(),
            remaining: state.remaining,
            done: state.done,
            failed: state.failed,
            closed: state.closed,
        }
    }

    /// Log the blocked steps and what they wait for.
    pub fn dump(&self) {
        let state = self.lock();
        info!(
            pending = state.pending,
            overflow = state.overflow.len(),
            remaining = state.remaining,
            closed = state.closed,
            "plan state"
        );
        for (target, steps) in state.waits.iter() {
            let ids: Vec<&str> = steps.iter().map(|s| s.id()).collect();
            debug!(target = %target, steps = ?ids, "waiting on target");
        }
    }
}

fn push_ready_locked(state: &mut PlanState, step: Arc<Step>) {
    // Keep FIFO order with steps already parked.
    if !state.overflow.is_empty() {
        state.overflow.push_back(step);
        drain_overflow_locked(state);
        return;
    }
    let Some(tx) = state.tx.as_ref() else {
        return;
    };
    match tx.try_send(step) {
        Ok(()) => {}
        Err(TrySendError::Full(step)) => state.overflow.push_back(step),
        Err(TrySendError::Closed(step)) => {
            debug!(step = %step.id(), "ready channel closed; dropping step");
        }
    }
}

fn drain_overflow_locked(state: &mut PlanState) {
    let Some(tx) = state.tx.as_ref() else {
        return;
    };
    while let Some(step) = state.overflow.pop_front() {
        match tx.try_send(step) {
            Ok(()) => {}
            Err(TrySendError::Full(step)) => {
                state.overflow.push_front(step);
                break;
            }
            Err(TrySendError::Closed(step)) => {
                state.overflow.push_front(step);
                break;
            }
        }
    }
}

fn maybe_close_locked(state: &mut PlanState) {
    if state.closed || !state.scheduling_done || state.remaining > 0 {
        return;
    }
    debug_assert!(state.overflow.is_empty());
    debug_assert_eq!(state.pending, 0);
    state.closed = true;
    state.tx = None;
    info!(done = state.done, failed = state.failed, "plan closed");
}
