//! External command execution with timeouts and output capture.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use crate::error::{CiError, Result};
use crate::stage::StepCommand;

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Command name.
    pub name: String,

    /// Exit code (0 = success, -1 = terminated by signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, for log dumps.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Runs [`StepCommand`]s as child processes.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute a command and capture its output.
    ///
    /// The child is killed if the timeout fires or the returned future is
    /// dropped (e.g. the job was cancelled mid-step).
    pub async fn execute(command: &StepCommand) -> Result<CommandOutput> {
        let start = Instant::now();

        if command.program.is_empty() {
            return Err(CiError::EmptyCommand(command.name.clone()));
        }

        debug!(command = %command.display(), "spawning");

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CiError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let output = if command.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(command.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| CiError::CommandTimeout {
                name: command.name.clone(),
                secs: command.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(CommandOutput {
            name: command.name.clone(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }
}
