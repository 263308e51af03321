//! [`CommandRunner`] backed by real host processes.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use async_trait::async_trait;
use keeper_core::ScriptedInput;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::task::JoinHandle;

use crate::backend::{CommandInput, CommandOutput, CommandRunner, HostCommand, OutputMode};
use crate::ExecutorError;

/// Runs host commands as `tokio` child processes.
///
/// Children are spawned with `kill_on_drop`, so a timed-out or cancelled wait
/// never leaves a process behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn stdio_for(mode: OutputMode) -> Stdio {
    match mode {
        OutputMode::Capture => Stdio::piped(),
        OutputMode::Inherit => Stdio::inherit(),
        OutputMode::Null => Stdio::null(),
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn execute(&self, command: HostCommand) -> Result<CommandOutput, ExecutorError> {
        tracing::debug!(command = %command, "running host command");

        let stdin = match command.stdin {
            CommandInput::Null => Stdio::null(),
            CommandInput::Inherit => Stdio::inherit(),
            CommandInput::Bytes(_) | CommandInput::Scripted(_) => Stdio::piped(),
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(stdin)
            .stdout(stdio_for(command.stdout))
            .stderr(stdio_for(command.stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutorError::Spawn { program: command.program.clone(), source })?;

        let writer = match (child.stdin.take(), command.stdin) {
            (Some(pipe), CommandInput::Bytes(bytes)) => {
                Some(tokio::spawn(write_bytes(pipe, bytes)))
            }
            (Some(pipe), CommandInput::Scripted(script)) => {
                Some(tokio::spawn(write_script(pipe, script)))
            }
            _ => None,
        };

        let wait = child.wait_with_output();
        let result = match command.timeout {
            Some(after) => tokio::time::timeout(after, wait).await.map_err(|_| {
                tracing::warn!(
                    program = %command.program.display(),
                    secs = after.as_secs(),
                    "command timed out"
                );
                ExecutorError::Timeout { program: command.program.clone(), after }
            }),
            None => Ok(wait.await),
        };

        stop_writer(writer);
        let output = result??;

        let out = CommandOutput {
            code: output.status.code(),
            signal: output.status.signal(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(
            program = %command.program.display(),
            status = %out.status_text(),
            "host command finished"
        );
        Ok(out)
    }
}

fn stop_writer(writer: Option<JoinHandle<()>>) {
    if let Some(handle) = writer {
        handle.abort();
    }
}

async fn write_bytes(mut pipe: ChildStdin, bytes: Vec<u8>) {
    if let Err(e) = pipe.write_all(&bytes).await {
        tracing::debug!(error = %e, "child closed stdin before input was consumed");
    }
    // Dropping the pipe delivers EOF.
}

/// Types `script` into `pipe` one line at a time.
///
/// Stops at the first write error: a closed pipe means the reader is gone.
async fn write_script(mut pipe: ChildStdin, script: ScriptedInput) {
    tokio::time::sleep(script.delay).await;
    for index in 0..script.lines.len() {
        if index > 0 {
            tokio::time::sleep(script.interval).await;
        }
        let Some(line) = script.line_bytes(index) else { break };
        if let Err(e) = pipe.write_all(&line).await {
            tracing::debug!(line = index, error = %e, "boot script writer stopped");
            return;
        }
        if let Err(e) = pipe.flush().await {
            tracing::debug!(line = index, error = %e, "boot script writer stopped");
            return;
        }
    }
    tracing::debug!(lines = script.lines.len(), "boot script delivered");
}
