// src/build/outputs.rs

//! After a command ran: check its outputs, update deps, show its output.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::build::{Builder, StepError};
use crate::deps::{DepsError, DepsRecord, DiscoveredDeps};
use crate::exec::ExecOutput;
use crate::step::{Cmd, Step};

impl Builder {
    pub(crate) async fn finish_step(&self, step: &Step, cmd: Cmd, out: ExecOutput) -> Result<(), StepError> {
        self.record_outputs(&cmd).await?;

        let stdout = match self.update_deps(step, &cmd, &out).await {
            Ok(Some(found)) => {
                step.set_cmd(cmd.with_tool_inputs(found.deps));
                found.stdout
            }
            Ok(None) => out.stdout,
            Err(err) if self.opts.strict_deps => {
                self.emit_output(step, &out.stdout, &out.stderr);
                return Err(err.into());
            }
            Err(err) => {
                // Not recording deps means the step is rebuilt next time.
                warn!(step = %step.id(), error = %err, "failed to update deps");
                out.stdout
            }
        };

        self.emit_output(step, &stdout, &out.stderr);
        if self.opts.fail_on_stdouterr && (!stdout.is_empty() || !out.stderr.is_empty()) {
            return Err(StepError::StdoutErr);
        }
        Ok(())
    }

    /// Every declared output must exist once the command succeeded. Outputs
    /// are hashed, so the stats run on the blocking pool.
    async fn record_outputs(&self, cmd: &Cmd) -> Result<(), StepError> {
        let hashfs = Arc::clone(&self.hashfs);
        let id = cmd.id().to_string();
        let outputs = cmd.outputs().to_vec();
        tokio::task::spawn_blocking(move || {
            for out in outputs {
                match hashfs.stat(&out) {
                    Ok(entry) => {
                        debug!(step = %id, output = %out, digest = ?entry.digest, "recorded output");
                    }
                    Err(err) if err.is_not_found() => return Err(StepError::MissingOutput(out)),
                    Err(err) => return Err(err.into()),
                }
            }
            Ok(())
        })
        .await?
    }

    /// Collect the deps the command reported and write them to the deps log.
    ///
    /// Runs as a separate task joined with a bounded wait. When the wait
    /// expires the task is left to finish on its own and its result is
    /// dropped; it records at most once either way. `Ok(None)` means the
    /// update was detached or the task died.
    async fn update_deps(
        &self,
        step: &Step,
        cmd: &Cmd,
        out: &ExecOutput,
    ) -> Result<Option<DiscoveredDeps>, DepsError> {
        let deps = Arc::clone(&self.deps);
        let depslog = Arc::clone(&self.depslog);
        let cmd = cmd.clone();
        let stdout = out.stdout.clone();

        let handle = tokio::spawn(async move {
            let found = deps.after_run(&cmd, &stdout)?;
            if let Some(primary) = cmd.outputs().first() {
                let record = DepsRecord {
                    cmd_hash: cmd.cmd_hash(),
                    deps: found.deps.clone(),
                };
                depslog
                    .record(primary, record)
                    .map_err(|e| DepsError::Log(e.to_string()))?;
            }
            Ok::<_, DepsError>(found)
        });

        match tokio::time::timeout(self.opts.deps_update_timeout, handle).await {
            Ok(Ok(res)) => res.map(Some),
            Ok(Err(join_err)) => {
                warn!(step = %step.id(), error = %join_err, "deps update task failed");
                Ok(None)
            }
            Err(_) => {
                warn!(
                    step = %step.id(),
                    timeout = ?self.opts.deps_update_timeout,
                    "deps update timed out; detaching"
                );
                Ok(None)
            }
        }
    }

    /// Show what a command printed, prefixed with the step description.
    pub(crate) fn emit_output(&self, step: &Step, stdout: &[u8], stderr: &[u8]) {
        if stdout.is_empty() && stderr.is_empty() {
            return;
        }
        let mut lock = std::io::stdout().lock();
        let res = writeln!(lock, "{}", step.def().description)
            .and_then(|_| lock.write_all(stdout))
            .and_then(|_| lock.write_all(stderr))
            .and_then(|_| lock.flush());
        if let Err(err) = res {
            debug!(step = %step.id(), error = %err, "failed to write step output");
        }
    }
}
