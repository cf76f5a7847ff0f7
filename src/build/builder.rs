// src/build/builder.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::build::{BuildStats, StepError};
use crate::config::model::ConfigSection;
use crate::deps::{DepsDiscoverer, DepsLogStore};
use crate::errors::{Result, SisoError};
use crate::exec::{ExecError, LocalExecutor, RemoteExecutor};
use crate::graph::Graph;
use crate::hashfs::HashFs;
use crate::path::ExecPaths;
use crate::plan::Plan;
use crate::step::Step;

/// Knobs for one build, normally taken from the `[config]` section.
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    pub parallelism: usize,
    pub remote: bool,
    pub remote_limit: usize,
    pub preproc_limit: usize,
    pub scan_limit: usize,
    /// Stop after this many failed steps; 0 never stops.
    pub keep_going: usize,
    pub no_fallback: bool,
    pub fail_on_stdouterr: bool,
    pub fast_deps: bool,
    pub strict_deps: bool,
    pub deps_update_timeout: Duration,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        BuilderOptions::from(&ConfigSection::default())
    }
}

impl From<&ConfigSection> for BuilderOptions {
    fn from(cfg: &ConfigSection) -> Self {
        Self {
            parallelism: cfg.parallelism,
            remote: cfg.remote,
            remote_limit: cfg.remote_limit,
            preproc_limit: cfg.preproc_limit,
            scan_limit: cfg.scan_limit,
            keep_going: cfg.keep_going,
            no_fallback: cfg.no_fallback,
            fail_on_stdouterr: cfg.fail_on_stdouterr,
            fast_deps: cfg.fast_deps,
            strict_deps: cfg.strict_deps,
            deps_update_timeout: Duration::from_millis(cfg.deps_update_timeout_ms),
        }
    }
}

/// Runs the steps of a [`Plan`] on a pool of workers.
///
/// One builder serves one build: create it, call [`Builder::build`], drop it.
pub struct Builder {
    pub(crate) opts: BuilderOptions,
    pub(crate) paths: Arc<ExecPaths>,
    pub(crate) hashfs: Arc<dyn HashFs>,
    pub(crate) local: Arc<dyn LocalExecutor>,
    pub(crate) remote: Option<Arc<dyn RemoteExecutor>>,
    pub(crate) deps: Arc<DepsDiscoverer>,
    pub(crate) depslog: Arc<dyn DepsLogStore>,
    pub(crate) input_deps: HashMap<String, Vec<String>>,
    pools: HashMap<String, Arc<Semaphore>>,
    pub(crate) remote_sem: Semaphore,
    pub(crate) preproc_sem: Semaphore,
    stats: Mutex<BuildStats>,
}

impl Builder {
    pub fn new(
        opts: BuilderOptions,
        paths: Arc<ExecPaths>,
        hashfs: Arc<dyn HashFs>,
        graph: &dyn Graph,
        local: Arc<dyn LocalExecutor>,
        depslog: Arc<dyn DepsLogStore>,
    ) -> Self {
        let pools = graph
            .step_limits()
            .into_iter()
            .map(|(name, limit)| (name, Arc::new(Semaphore::new(limit.max(1)))))
            .collect();
        let deps = Arc::new(DepsDiscoverer::new(
            Arc::clone(&hashfs),
            Arc::clone(&paths),
            opts.scan_limit,
        ));

        Self {
            remote_sem: Semaphore::new(opts.remote_limit.max(1)),
            preproc_sem: Semaphore::new(opts.preproc_limit.max(1)),
            opts,
            paths,
            hashfs,
            local,
            remote: None,
            deps,
            depslog,
            input_deps: graph.input_deps(),
            pools,
            stats: Mutex::new(BuildStats::default()),
        }
    }

    /// Use `remote` for steps that allow remote execution.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteExecutor>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.opts
    }

    /// Snapshot of the stats gathered so far.
    pub fn stats(&self) -> BuildStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run every step of `plan` until it closes, `cancel` fires, or too many
    /// steps fail.
    ///
    /// Returns the build stats on success. A build with failed steps returns
    /// [`SisoError::BuildFailed`]; a canceled build returns
    /// [`SisoError::Canceled`].
    pub async fn build(self: &Arc<Self>, plan: Arc<Plan>, cancel: CancellationToken) -> Result<BuildStats> {
        if self.opts.remote && self.remote.is_none() {
            warn!("remote execution enabled but no remote client configured; running locally");
        }

        // Stopped by keep_going without canceling the caller's token.
        let stop = cancel.child_token();
        let workers = self.opts.parallelism.max(1);
        info!(workers, "starting build");

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let builder = Arc::clone(self);
            let plan = Arc::clone(&plan);
            let stop = stop.clone();
            set.spawn(async move { builder.worker(worker, &plan, &stop).await });
        }

        while let Some(res) = set.join_next().await {
            if let Err(err) = res {
                error!(error = %err, "build worker panicked");
                stop.cancel();
            }
        }

        if let Err(err) = self.depslog.flush() {
            warn!(error = %err, "failed to save deps log");
        }

        let stats = self.stats();
        info!(%stats, "build finished");
        if !plan.is_closed() {
            plan.dump();
        }

        if cancel.is_cancelled() {
            return Err(SisoError::Canceled);
        }
        if stats.failed > 0 {
            return Err(SisoError::BuildFailed {
                failed: stats.failed,
            });
        }
        Ok(stats)
    }

    async fn worker(&self, worker: usize, plan: &Plan, stop: &CancellationToken) {
        debug!(worker, "worker started");
        while let Some(step) = plan.next(stop).await {
            match self.run_step(stop, &step).await {
                Ok(()) => {
                    plan.done(&step);
                    let metrics = step.metrics();
                    self.lock_stats().record_done(&metrics, step.def().phony);
                }
                Err(err) => self.handle_failure(plan, &step, err, stop),
            }
        }
        debug!(worker, "worker exiting");
    }

    fn handle_failure(&self, plan: &Plan, step: &Step, err: StepError, stop: &CancellationToken) {
        let canceled = err.is_canceled();
        let blocked = plan.fail(step);

        // Canceled because the build is stopping; not a failure of its own.
        if canceled && stop.is_cancelled() {
            debug!(step = %step.id(), "step canceled");
            return;
        }

        let err = SisoError::StepFailed {
            step: step.id().to_string(),
            source: err,
        };
        error!(step = %step.id(), blocked = blocked.len(), error = %err, "step failed");

        let failed = {
            let mut stats = self.lock_stats();
            stats.record_failed(&step.metrics(), blocked.len());
            stats.failed
        };
        if self.opts.keep_going > 0 && failed >= self.opts.keep_going && !stop.is_cancelled() {
            warn!(failed, keep_going = self.opts.keep_going, "too many failures; stopping build");
            stop.cancel();
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, BuildStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hold a slot in the step's pool, if it names one.
    pub(crate) async fn acquire_pool(
        &self,
        cancel: &CancellationToken,
        pool: Option<&str>,
    ) -> std::result::Result<Option<OwnedSemaphorePermit>, ExecError> {
        let Some(sem) = pool.and_then(|name| self.pools.get(name)) else {
            return Ok(None);
        };
        let sem = Arc::clone(sem);
        tokio::select! {
            _ = cancel.cancelled() => Err(ExecError::Canceled),
            permit = sem.acquire_owned() => permit.map(Some).map_err(|_| ExecError::Canceled),
        }
    }

    /// Take a permit from one of the builder's semaphores, giving up on
    /// cancellation.
    pub(crate) async fn acquire<'a>(
        cancel: &CancellationToken,
        sem: &'a Semaphore,
    ) -> std::result::Result<tokio::sync::SemaphorePermit<'a>, ExecError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ExecError::Canceled),
            permit = sem.acquire() => permit.map_err(|_| ExecError::Canceled),
        }
    }
}
