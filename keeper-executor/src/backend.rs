//! External process abstraction.
//!
//! Every host interaction (volume metadata, interface control, boot loader,
//! hypervisor, process introspection) goes through [`CommandRunner`], so the
//! lifecycle logic can run against a fake host in tests.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use keeper_core::{BootInput, ScriptedInput};

use crate::ExecutorError;

/// Where a child's stdin comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommandInput {
    /// `/dev/null`.
    #[default]
    Null,
    /// The caller's stdin.
    Inherit,
    /// Bytes written up front, then EOF.
    Bytes(Vec<u8>),
    /// Lines written by a background task at a fixed pace.
    Scripted(ScriptedInput),
}

impl From<BootInput> for CommandInput {
    fn from(input: BootInput) -> Self {
        match input {
            BootInput::Empty => Self::Null,
            BootInput::Inherit => Self::Inherit,
            BootInput::Literal(bytes) => Self::Bytes(bytes),
            BootInput::Scripted(script) => Self::Scripted(script),
        }
    }
}

/// Where a child's stdout or stderr goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Collected into [`CommandOutput`].
    #[default]
    Capture,
    /// Shared with the caller.
    Inherit,
    /// Discarded.
    Null,
}

/// A fully described external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct HostCommand {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments, excluding the program name.
    pub args: Vec<String>,
    /// stdin source.
    pub stdin: CommandInput,
    /// stdout sink.
    pub stdout: OutputMode,
    /// stderr sink.
    pub stderr: OutputMode,
    /// Kill the child if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl HostCommand {
    /// Creates an invocation with null stdin and captured output.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: CommandInput::Null,
            stdout: OutputMode::Capture,
            stderr: OutputMode::Capture,
            timeout: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the stdin source.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<CommandInput>) -> Self {
        self.stdin = input.into();
        self
    }

    /// Sets the stdout sink.
    #[must_use]
    pub fn stdout(mut self, mode: OutputMode) -> Self {
        self.stdout = mode;
        self
    }

    /// Sets the stderr sink.
    #[must_use]
    pub fn stderr(mut self, mode: OutputMode) -> Self {
        self.stderr = mode;
        self
    }

    /// Sets the timeout; `None` waits forever.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program file name, for matching in logs and fakes.
    #[must_use]
    pub fn program_name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed.
    pub signal: Option<i32>,
    /// Captured stdout (empty unless captured).
    pub stdout: String,
    /// Captured stderr (empty unless captured).
    pub stderr: String,
}

impl CommandOutput {
    /// A zero exit with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self { code: Some(0), signal: None, stdout: stdout.into(), stderr: String::new() }
    }

    /// A non-zero exit with the given stderr.
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), signal: None, stdout: String::new(), stderr: stderr.into() }
    }

    /// True for a zero exit code.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human-readable exit description.
    #[must_use]
    pub fn status_text(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit status {code}"),
            (None, Some(signal)) => format!("killed by signal {signal}"),
            (None, None) => "unknown exit status".to_owned(),
        }
    }
}

/// Executes external programs on the host.
///
/// Implementations must be `Send + Sync` so VM handles can move across tasks.
///
/// # Cancel Safety
/// Dropping an in-flight `execute` future must kill the child.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion and reports how it exited.
    ///
    /// A non-zero exit is not an error at this level.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Spawn`] if the program cannot be started and
    /// [`ExecutorError::Timeout`] if it outlives `command.timeout`.
    async fn execute(&self, command: HostCommand) -> Result<CommandOutput, ExecutorError>;

    /// Runs `command` and requires a zero exit.
    ///
    /// # Errors
    /// As [`CommandRunner::execute`], plus [`ExecutorError::CommandFailed`] for
    /// a non-zero exit or a signal.
    async fn run(&self, command: HostCommand) -> Result<CommandOutput, ExecutorError> {
        let program = command.program.clone();
        let output = self.execute(command).await?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(ExecutorError::CommandFailed {
                program,
                status: output.status_text(),
                stderr: output.stderr,
            })
        }
    }
}
