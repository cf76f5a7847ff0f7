#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use siso::build::{BuildStats, Builder, BuilderOptions};
use siso::config::ConfigFile;
use siso::deps::depslog::MemoryDepsLog;
use siso::deps::DepsLogStore;
use siso::errors::Result;
use siso::graph::ManifestGraph;
use siso::hashfs::MemHashFs;
use siso::path::ExecPaths;
use siso::plan::{schedule, Plan};
use siso_test_utils::fake_exec::{FakeLocal, FakeRemote};
use siso_test_utils::thread_fs::ThreadTrackingFs;
use tokio_util::sync::CancellationToken;

pub const EXEC_ROOT: &str = "/work";

/// Everything one in-memory build needs. The deps log and the file system
/// survive between builds, like they would on disk.
pub struct Harness {
    pub cfg: ConfigFile,
    pub fs: MemHashFs,
    /// What the builder sees: `fs`, with stat calls traced by thread.
    pub tracked: ThreadTrackingFs,
    pub local: FakeLocal,
    pub remote: FakeRemote,
    pub depslog: Arc<MemoryDepsLog>,
}

impl Harness {
    pub fn new(cfg: ConfigFile) -> Self {
        let fs = MemHashFs::new();
        Self {
            cfg,
            local: FakeLocal::new(fs.clone()),
            remote: FakeRemote::new(fs.clone()),
            tracked: ThreadTrackingFs::new(fs.clone()),
            fs,
            depslog: Arc::new(MemoryDepsLog::new()),
        }
    }

    /// Add source files, oldest first.
    pub fn with_sources(self, paths: &[&str]) -> Self {
        for p in paths {
            self.fs.add_file(p, format!("// {p}\n"));
        }
        self
    }

    /// Make every local run take `delay`.
    pub fn with_local_delay(mut self, delay: Duration) -> Self {
        self.local = self.local.with_delay(delay);
        self
    }

    /// Schedule `targets` (empty = defaults) on a fresh graph and plan, then
    /// run the build to completion.
    pub async fn build(&self, targets: &[&str]) -> Result<BuildStats> {
        self.build_with_cancel(targets, CancellationToken::new()).await
    }

    pub async fn build_with_cancel(&self, targets: &[&str], cancel: CancellationToken) -> Result<BuildStats> {
        let graph = ManifestGraph::from_config(&self.cfg);
        let plan = Arc::new(Plan::new(self.cfg.config.ready_queue_capacity));
        let args: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        schedule(&plan, &graph, &self.fs, &cancel, &args)?;

        let depslog: Arc<dyn DepsLogStore> = self.depslog.clone();
        let mut builder = Builder::new(
            BuilderOptions::from(&self.cfg.config),
            Arc::new(ExecPaths::new(EXEC_ROOT, &self.cfg.config.dir)),
            Arc::new(self.tracked.clone()),
            &graph,
            Arc::new(self.local.clone()),
            depslog,
        );
        if self.cfg.config.remote {
            builder = builder.with_remote(Arc::new(self.remote.clone()));
        }
        Arc::new(builder).build(plan, cancel).await
    }
}
