use std::{
    io,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::process::Command;

use crate::util::truncate_diagnostic;

pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit status followed by the tail of stderr.
    pub fn diagnostic(&self, limit: usize) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exited with {}", self.status)
        } else {
            format!(
                "exited with {}: {}",
                self.status,
                truncate_diagnostic(stderr, limit)
            )
        }
    }
}

/// Run a command to completion, capturing its output.
///
/// The child is killed when the returned future is dropped or the timeout elapses.
pub async fn run_command(
    command: &mut Command,
    timeout: Option<Duration>,
) -> io::Result<CommandOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!("Running {:?}", command.as_std());

    let child = command.spawn()?;
    let output = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("process did not finish within {}s", timeout.as_secs()),
                )
            })??,
        None => child.wait_with_output().await?,
    };

    Ok(CommandOutput {
        status: output.status,
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
