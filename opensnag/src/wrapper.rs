//! Traced-command lifecycle for wrapper mode.
//!
//! Spawns the command with inherited stdio, forwards its exit status into
//! the consumer loop, and tears it down gracefully when the tracer is asked
//! to stop first.

use std::time::Duration;

use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Grace period between SIGTERM and SIGKILL when tearing down the child.
const KILL_GRACE: Duration = Duration::from_secs(3);

/// A launched traced command.
pub struct TracedChild {
    pub pid: u32,
    exit_rx: mpsc::Receiver<Option<i32>>,
}

impl TracedChild {
    /// Spawn `command` with inherited stdio and start a task forwarding its
    /// exit status.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("wrapper mode requires a command")?;

        // kill_on_drop covers abrupt tracer exits; the normal teardown path
        // goes through terminate() for a graceful SIGTERM first.
        let mut child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{program}'"))?;
        let pid = child.id().context("spawned command has no pid")?;

        let (exit_tx, exit_rx) = mpsc::channel::<Option<i32>>(1);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let _ = exit_tx.send(status.code()).await;
                }
                Err(e) => {
                    error!(error = %e, "error waiting for traced command");
                    let _ = exit_tx.send(None).await;
                }
            }
        });

        Ok(Self { pid, exit_rx })
    }

    /// Wait for the traced command to exit. Returns its exit code, or None
    /// if it was killed by a signal.
    pub async fn exited(&mut self) -> Option<i32> {
        self.exit_rx.recv().await.flatten()
    }

    /// Graceful teardown: SIGTERM, wait up to the grace period for the exit
    /// to come through, then SIGKILL.
    pub async fn terminate(mut self) {
        let nix_pid = Pid::from_raw(self.pid as i32);
        if signal::kill(nix_pid, Signal::SIGTERM).is_err() {
            return; // Already gone
        }
        debug!(pid = self.pid, "sent SIGTERM to traced command");

        match tokio::time::timeout(KILL_GRACE, self.exit_rx.recv()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = signal::kill(nix_pid, Signal::SIGKILL);
                debug!(pid = self.pid, "sent SIGKILL to traced command");
            }
        }
    }
}
