//! tokio process runner.
//!
//! Commands run through the platform shell (`sh -c`, or `cmd /C` on Windows)
//! with the workflow's environment overlay added on top of the inherited
//! environment. Synchronous commands share stackup's stdin so they can prompt.
//! Detached processes get a null stdin and are placed in their own process
//! group on Unix so a terminal interrupt reaches stackup first; killing one
//! signals the whole group.

use std::process::Stdio;
#[cfg(unix)]
use std::time::Duration;

use futures_util::future::BoxFuture;
use stackup_core::process::{ExitReport, ProcessError, ProcessRunner, ProcessSpec, RunningProcess};
use tokio::process::{Child, Command};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

/// How long a detached process group gets to exit after SIGTERM.
#[cfg(unix)]
const KILL_GRACE: Duration = Duration::from_secs(3);
#[cfg(unix)]
const KILL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

fn shell_command(spec: &ProcessSpec, stdin: Stdio) -> Command {
    #[cfg(windows)]
    let mut command = {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&spec.command);
        c
    };
    #[cfg(not(windows))]
    let mut command = {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&spec.command);
        c
    };

    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    command.envs(&spec.env);
    if spec.silent {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }
    command.stdin(stdin);
    command
}

fn spawn_error(spec: &ProcessSpec, e: std::io::Error) -> ProcessError {
    ProcessError::Spawn {
        command: spec.command.clone(),
        reason: e.to_string(),
    }
}

impl ProcessRunner for TokioProcessRunner {
    fn run_to_completion<'a>(
        &'a self,
        spec: &'a ProcessSpec,
    ) -> BoxFuture<'a, Result<ExitReport, ProcessError>> {
        Box::pin(async move {
            let mut child = shell_command(spec, Stdio::inherit())
                .spawn()
                .map_err(|e| spawn_error(spec, e))?;
            let status = child
                .wait()
                .await
                .map_err(|e| ProcessError::Wait(e.to_string()))?;
            tracing::debug!(command = %spec.command, code = ?status.code(), "command finished");
            Ok(ExitReport {
                success: status.success(),
                code: status.code(),
            })
        })
    }

    fn start_detached<'a>(
        &'a self,
        spec: &'a ProcessSpec,
    ) -> BoxFuture<'a, Result<Box<dyn RunningProcess>, ProcessError>> {
        Box::pin(async move {
            let mut command = shell_command(spec, Stdio::null());
            #[cfg(unix)]
            command.process_group(0);

            let child = command.spawn().map_err(|e| spawn_error(spec, e))?;
            tracing::debug!(command = %spec.command, pid = ?child.id(), "process started");
            Ok(Box::new(TokioProcess::new(child)) as Box<dyn RunningProcess>)
        })
    }
}

/// A detached child process.
pub struct TokioProcess {
    child: Child,
    /// Group leader pid; the shell was spawned with `process_group(0)`.
    #[cfg(unix)]
    group: Option<Pid>,
}

impl TokioProcess {
    fn new(child: Child) -> Self {
        Self {
            #[cfg(unix)]
            group: child
                .id()
                .and_then(|pid| i32::try_from(pid).ok())
                .map(Pid::from_raw),
            child,
        }
    }

    /// SIGTERM the group, wait up to [`KILL_GRACE`] for every member to
    /// exit, then SIGKILL whatever is left.
    #[cfg(unix)]
    async fn terminate_group(&mut self, group: Pid) -> Result<(), ProcessError> {
        signal_group(group, Signal::SIGTERM)?;

        let deadline = tokio::time::Instant::now() + KILL_GRACE;
        let _ = tokio::time::timeout_at(deadline, self.child.wait()).await;
        while group_alive(group) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(KILL_POLL).await;
        }

        if group_alive(group) {
            tracing::debug!(pgid = group.as_raw(), "process group ignored SIGTERM");
            signal_group(group, Signal::SIGKILL)?;
        }
        self.child
            .wait()
            .await
            .map(|_| ())
            .map_err(|e| ProcessError::Wait(e.to_string()))
    }
}

#[cfg(unix)]
fn signal_group(group: Pid, signal: Signal) -> Result<(), ProcessError> {
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(ProcessError::Kill(format!("{signal} to group {group}: {e}"))),
    }
}

#[cfg(unix)]
fn group_alive(group: Pid) -> bool {
    killpg(group, None::<Signal>).is_ok()
}

impl RunningProcess for TokioProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<(), ProcessError>> {
        Box::pin(async move {
            // The shell may have exited while its children keep the group alive.
            #[cfg(unix)]
            if let Some(group) = self.group {
                return self.terminate_group(group).await;
            }

            if let Ok(Some(status)) = self.child.try_wait() {
                tracing::debug!(code = ?status.code(), "process already exited");
                return Ok(());
            }
            self.child
                .kill()
                .await
                .map_err(|e| ProcessError::Kill(e.to_string()))
        })
    }
}
