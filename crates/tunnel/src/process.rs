//! Child process helpers shared by the process-backed strategies

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::TunnelError;
use crate::matcher::UrlSlot;

/// How long output readers may lag behind the exit of their process
const READER_DRAIN: Duration = Duration::from_millis(500);

/// Program and arguments of an external tunnel client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl ProcessCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// Spawn `command` with all three standard streams piped
///
/// A binary that cannot be found maps to [`TunnelError::DependencyMissing`].
pub(crate) fn spawn_piped(command: &ProcessCommand) -> Result<Child, TunnelError> {
    Command::new(&command.program)
        .args(&command.args)
        .envs(command.envs.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TunnelError::DependencyMissing {
                    binary: command.program.clone(),
                }
            } else {
                TunnelError::Spawn(e)
            }
        })
}

/// Wait for `slot` to be filled, the child to exit, or `budget` to run out
///
/// When the child exits first, its `readers` get a short window to reach EOF
/// so a URL printed just before exit still counts.
pub(crate) async fn wait_for_url(
    child: &mut Child,
    slot: &UrlSlot,
    readers: &mut [JoinHandle<()>],
    budget: Duration,
) -> Result<String, TunnelError> {
    let outcome = tokio::time::timeout(budget, async {
        tokio::select! {
            biased;
            url = slot.resolved() => Ok(url),
            status = child.wait() => Err(match status {
                Ok(status) => status.to_string(),
                Err(e) => e.to_string(),
            }),
        }
    })
    .await;

    let status = match outcome {
        Ok(Ok(url)) => return Ok(url),
        Ok(Err(status)) => status,
        Err(_) => return Err(TunnelError::Timeout(budget)),
    };

    let deadline = tokio::time::Instant::now() + READER_DRAIN;
    for reader in readers.iter_mut().filter(|r| !r.is_finished()) {
        let _ = tokio::time::timeout_at(deadline, reader).await;
    }

    slot.get().ok_or(TunnelError::ProcessExited(status))
}

/// Terminate a process: SIGTERM, wait grace period, then SIGKILL
pub(crate) async fn terminate_process(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::warn!(pid, error = %err, "Failed to send SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!("Process exited with status: {}", status),
        Ok(Err(e)) => tracing::warn!("Failed to wait for process: {}", e),
        Err(_) => {
            tracing::warn!("Grace period expired, sending SIGKILL");
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill process: {}", e);
            }
        }
    }
}
