// src/step/metrics.rs

use std::time::Duration;

/// What happened to a step, reported once it reaches a terminal state.
///
/// The flags let a user tell "succeeded optimally" (cache hit, remote) apart
/// from "succeeded slowly" (fallback, deps log error).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepMetrics {
    /// Final execution happened on a remote worker (or came from its cache).
    pub is_remote: bool,
    pub cache_hit: bool,
    /// Remote execution failed and the step was re-run locally.
    pub fallback: bool,
    /// Ran speculatively with deps recorded by a previous build.
    pub deps_log: bool,
    /// The speculative run failed and the step was retried on the slow path.
    pub deps_log_err: bool,
    /// The include scan failed; the step ran locally instead.
    pub scan_err: bool,
    /// Up to date; nothing ran.
    pub skipped: bool,

    /// Time spent waiting in the ready queue.
    pub queue: Duration,
    /// Time from dispatch to completion.
    pub run: Duration,
    /// Time inside the executor call that produced the outputs.
    pub exec: Duration,
}
