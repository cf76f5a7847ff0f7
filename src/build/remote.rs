// src/build/remote.rs

//! Remote path: fast deps, preprocessing, cache lookup, remote execution,
//! and local fallback.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::build::{Builder, StepError};
use crate::deps::DepsError;
use crate::exec::{ExecError, ExecOutput, RemoteExecutor};
use crate::step::{Cmd, Step, StepPhase};
use crate::types::ExecLocation;

impl Builder {
    pub(crate) async fn run_remote_path(
        &self,
        cancel: &CancellationToken,
        step: &Step,
        cmd: Cmd,
    ) -> Result<(Cmd, ExecOutput), StepError> {
        let Some(remote) = self.remote.as_deref() else {
            return self.run_local(cancel, step, cmd, false).await;
        };

        if let Some(fast_cmd) = self.fast_deps_cmd(&cmd) {
            match self.try_fast_step(cancel, step, remote, &fast_cmd).await {
                Ok(Some(out)) => return Ok((fast_cmd, out)),
                Ok(None) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let cmd = match self.preproc(cancel, cmd.clone()).await {
            Ok(cmd) => cmd,
            Err(DepsError::Canceled) => return Err(ExecError::Canceled.into()),
            Err(err) => {
                warn!(step = %step.id(), error = %err, "deps scan failed; running locally");
                step.update_metrics(|m| m.scan_err = true);
                return self.run_local(cancel, step, cmd, false).await;
            }
        };
        let cmd = cmd.preprocessed();
        step.set_cmd(cmd.clone());

        match self.exec_remote(cancel, step, remote, &cmd).await {
            Ok(out) => Ok((cmd, out)),
            Err(err) if err.fallback_eligible() && !self.opts.no_fallback => {
                warn!(step = %step.id(), error = %err, "remote execution failed; falling back to local");
                self.run_local(cancel, step, cmd, true).await
            }
            Err(err) => {
                debug!(step = %step.id(), error = %err, "remote execution failed without fallback");
                Err(err.into())
            }
        }
    }

    /// Command enriched with deps logged by a previous build, if fast deps
    /// are enabled and the log matches this command.
    fn fast_deps_cmd(&self, cmd: &Cmd) -> Option<Cmd> {
        if !self.opts.fast_deps {
            return None;
        }
        let primary = cmd.outputs().first()?;
        let record = self.depslog.get(primary)?;
        if record.cmd_hash != cmd.cmd_hash() {
            return None;
        }
        Some(cmd.clone().with_tool_inputs(record.deps).preprocessed())
    }

    /// Speculative run with logged deps.
    ///
    /// `Ok(None)` means the run didn't count and the step goes down the
    /// normal path. Only errors that would also fail the normal path are
    /// returned.
    async fn try_fast_step(
        &self,
        cancel: &CancellationToken,
        step: &Step,
        remote: &dyn RemoteExecutor,
        cmd: &Cmd,
    ) -> Result<Option<ExecOutput>, ExecError> {
        step.update_metrics(|m| m.deps_log = true);

        let err = match self.exec_remote(cancel, step, remote, cmd).await {
            Ok(out) if self.opts.fail_on_stdouterr && out.has_output() => {
                ExecError::Transient("fast deps run printed output".to_string())
            }
            Ok(out) => {
                debug!(step = %step.id(), "fast deps run succeeded");
                return Ok(Some(out));
            }
            Err(err) if !err.retry_on_slow_path() => return Err(err),
            Err(err) => err,
        };

        info!(step = %step.id(), error = %err, "fast deps run failed; retrying with deps scan");
        step.update_metrics(|m| {
            m.deps_log = false;
            m.deps_log_err = true;
            m.is_remote = false;
            m.cache_hit = false;
        });
        Ok(None)
    }

    /// Apply scanned deps, bounded by the preprocessing semaphore.
    async fn preproc(&self, cancel: &CancellationToken, cmd: Cmd) -> Result<Cmd, DepsError> {
        let _permit = Self::acquire(cancel, &self.preproc_sem)
            .await
            .map_err(|_| DepsError::Canceled)?;
        self.deps.scan(cancel, cmd).await
    }

    /// Cache lookup, then remote execution on a miss. A non-zero remote exit
    /// is reported as [`ExecError::Transient`].
    async fn exec_remote(
        &self,
        cancel: &CancellationToken,
        step: &Step,
        remote: &dyn RemoteExecutor,
        cmd: &Cmd,
    ) -> Result<ExecOutput, ExecError> {
        step.set_phase(StepPhase::Running(ExecLocation::Remote));
        let start = Instant::now();

        match remote.cache_lookup(cancel, cmd).await {
            Ok(Some(out)) if out.success() => {
                debug!(step = %step.id(), "remote cache hit");
                step.update_metrics(|m| {
                    m.is_remote = true;
                    m.cache_hit = true;
                    m.exec = start.elapsed();
                });
                return Ok(out);
            }
            Ok(_) => {}
            Err(err) if err.fallback_eligible() => {
                warn!(step = %step.id(), error = %err, "remote cache lookup failed; treating as miss");
            }
            Err(err) => return Err(err),
        }

        let out = {
            let _permit = Self::acquire(cancel, &self.remote_sem).await?;
            remote.run(cancel, cmd).await?
        };
        if !out.success() {
            return Err(ExecError::Transient(format!(
                "remote command exited with status {}",
                out.exit_code
            )));
        }

        step.update_metrics(|m| {
            m.is_remote = true;
            m.cache_hit = false;
            m.exec = start.elapsed();
        });
        Ok(out)
    }
}
