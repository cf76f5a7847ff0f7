// src/build/run_step.rs

//! Per-step flow.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::build::{Builder, StepError};
use crate::exec::ExecOutput;
use crate::hashfs::HashFs;
use crate::step::{Cmd, Step, StepPhase};
use crate::types::ExecLocation;

impl Builder {
    /// Run one dispatched step to completion, up to but not including
    /// reporting back to the Plan.
    pub(crate) async fn run_step(&self, cancel: &CancellationToken, step: &Step) -> Result<(), StepError> {
        let def = step.def();
        if def.phony {
            trace!(step = %step.id(), "phony step");
            return Ok(());
        }

        let cmd = Cmd::from_step_def(def, self.paths.dir()).expand_labels(&self.input_deps);
        let cmd = self.deps.fix_outputs(cmd);
        step.set_cmd(cmd.clone());

        if self.up_to_date(&cmd).await {
            info!(step = %step.id(), "up to date; skipping");
            step.update_metrics(|m| m.skipped = true);
            return Ok(());
        }

        let _pool = self.acquire_pool(cancel, cmd.pool()).await?;

        info!(step = %step.id(), desc = %cmd.desc(), "running step");
        let (cmd, out) = if self.use_remote(&cmd) {
            self.run_remote_path(cancel, step, cmd).await?
        } else {
            self.run_local(cancel, step, cmd, false).await?
        };

        step.set_phase(StepPhase::OutputProcessing);
        step.set_cmd(cmd.clone());
        self.finish_step(step, cmd, out).await
    }

    fn use_remote(&self, cmd: &Cmd) -> bool {
        self.opts.remote && self.remote.is_some() && cmd.remote_allowed()
    }

    /// A step is up to date when all outputs exist, the deps log has a record
    /// for the same command, and no declared or logged input is newer than
    /// the oldest output.
    pub(crate) async fn up_to_date(&self, cmd: &Cmd) -> bool {
        let Some(primary) = cmd.outputs().first() else {
            return false;
        };
        let Some(record) = self.depslog.get(primary) else {
            return false;
        };
        if record.cmd_hash != cmd.cmd_hash() {
            debug!(step = %cmd.id(), "command changed since last build");
            return false;
        }

        let hashfs = Arc::clone(&self.hashfs);
        let id = cmd.id().to_string();
        let outputs = cmd.outputs().to_vec();
        let inputs: Vec<String> = cmd.all_inputs().into_iter().chain(record.deps).collect();
        let check = move || outputs_are_fresh(hashfs.as_ref(), &id, &outputs, &inputs);
        match tokio::task::spawn_blocking(check).await {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(step = %cmd.id(), error = %err, "up-to-date check failed");
                false
            }
        }
    }

    /// Run `cmd` on the local machine. `fallback` marks a re-run after a
    /// failed remote attempt.
    pub(crate) async fn run_local(
        &self,
        cancel: &CancellationToken,
        step: &Step,
        cmd: Cmd,
        fallback: bool,
    ) -> Result<(Cmd, ExecOutput), StepError> {
        step.set_phase(StepPhase::Running(ExecLocation::Local));

        // Remote outputs may still only exist in HashFS.
        self.hashfs.flush(&cmd.all_inputs())?;

        let start = Instant::now();
        let out = self.local.run(cancel, &cmd).await?;
        step.update_metrics(|m| {
            m.is_remote = false;
            m.cache_hit = false;
            m.exec = start.elapsed();
            if fallback {
                m.fallback = true;
            }
        });

        for path in cmd.remote_outputs() {
            if let Err(err) = self.hashfs.refresh(&path) {
                trace!(step = %step.id(), path = %path, error = %err, "output not found after local run");
            }
        }

        if !out.success() {
            self.emit_output(step, &out.stdout, &out.stderr);
            return Err(StepError::ExitStatus(out.exit_code));
        }
        Ok((cmd, out))
    }
}

/// Stats every output and input; blocking.
fn outputs_are_fresh(hashfs: &dyn HashFs, id: &str, outputs: &[String], inputs: &[String]) -> bool {
    let mut oldest: Option<SystemTime> = None;
    for out in outputs {
        match hashfs.stat(out) {
            Ok(entry) => {
                oldest = Some(oldest.map_or(entry.mtime, |t| t.min(entry.mtime)));
            }
            Err(_) => return false,
        }
    }
    let Some(oldest) = oldest else {
        return false;
    };

    for input in inputs {
        match hashfs.stat(input) {
            Ok(entry) if entry.is_dir => {}
            Ok(entry) if entry.mtime <= oldest => {}
            Ok(_) => {
                debug!(step = %id, input = %input, "input is newer than outputs");
                return false;
            }
            Err(_) => {
                debug!(step = %id, input = %input, "input is missing");
                return false;
            }
        }
    }
    true
}
