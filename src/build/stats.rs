// src/build/stats.rs

use std::fmt;

use crate::step::StepMetrics;

/// Aggregate step counts for one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Steps that finished successfully, including skipped and phony ones.
    pub done: usize,
    /// Up to date; nothing ran.
    pub skipped: usize,
    pub phony: usize,
    /// Final result came from a remote worker or the remote cache.
    pub remote: usize,
    pub cache_hit: usize,
    pub local: usize,
    pub fallback: usize,
    pub deps_log: usize,
    pub deps_log_err: usize,
    pub scan_err: usize,
    pub failed: usize,
    /// Never ran because a dependency failed.
    pub blocked: usize,
}

impl BuildStats {
    /// Fold in a successfully finished step.
    pub fn record_done(&mut self, metrics: &StepMetrics, phony: bool) {
        self.done += 1;
        if phony {
            self.phony += 1;
        } else if metrics.skipped {
            self.skipped += 1;
        } else if metrics.is_remote {
            self.remote += 1;
            if metrics.cache_hit {
                self.cache_hit += 1;
            }
        } else {
            self.local += 1;
        }
        self.record_flags(metrics);
    }

    /// Fold in a failed step and the dependents it blocked.
    pub fn record_failed(&mut self, metrics: &StepMetrics, blocked: usize) {
        self.failed += 1;
        self.blocked += blocked;
        self.record_flags(metrics);
    }

    fn record_flags(&mut self, metrics: &StepMetrics) {
        if metrics.fallback {
            self.fallback += 1;
        }
        if metrics.deps_log {
            self.deps_log += 1;
        }
        if metrics.deps_log_err {
            self.deps_log_err += 1;
        }
        if metrics.scan_err {
            self.scan_err += 1;
        }
    }
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "done:{} skipped:{} remote:{} cache:{} local:{} fallback:{} deps_log:{} deps_log_err:{} failed:{}",
            self.done,
            self.skipped,
            self.remote,
            self.cache_hit,
            self.local,
            self.fallback,
            self.deps_log,
            self.deps_log_err,
            self.failed,
        )
    }
}
