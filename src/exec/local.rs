// src/exec/local.rs

//! Local process runner.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::exec::{ExecError, ExecFuture, ExecOutput, LocalExecutor};
use crate::step::Cmd;

/// Runs commands as child processes of siso.
///
/// The argument vector is executed directly (no shell) in
/// `<exec_root>/<cmd.dir>`. Cancellation kills the child.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    exec_root: PathBuf,
}

impl ProcessExecutor {
    pub fn new(exec_root: impl Into<PathBuf>) -> Self {
        Self {
            exec_root: exec_root.into(),
        }
    }

    async fn run_inner(&self, cancel: &CancellationToken, cmd: &Cmd) -> Result<ExecOutput, ExecError> {
        let Some((program, args)) = cmd.args().split_first() else {
            return Err(ExecError::Transient(format!("step {} has an empty command", cmd.id())));
        };

        let workdir = self.exec_root.join(cmd.dir());
        info!(step = %cmd.id(), program = %program, dir = ?workdir, "starting local process");

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&workdir)
            .envs(cmd.env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| ExecError::Transient(format!("spawning {program} for step {}: {e}", cmd.id())))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(step = %cmd.id(), "cancellation requested; killing local process");
                return Err(ExecError::Canceled);
            }
            out = child.wait_with_output() => out.map_err(|e| {
                ExecError::Transient(format!("waiting for step {}: {e}", cmd.id()))
            })?,
        };

        let exit_code = output.status.code().unwrap_or(-1);
        info!(
            step = %cmd.id(),
            exit_code,
            success = output.status.success(),
            "local process exited"
        );

        Ok(ExecOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            cached: false,
        })
    }
}

impl LocalExecutor for ProcessExecutor {
    fn run<'a>(&'a self, cancel: &'a CancellationToken, cmd: &'a Cmd) -> ExecFuture<'a> {
        Box::pin(self.run_inner(cancel, cmd))
    }
}
