//! Error types for the command-line front-end.

use std::path::PathBuf;

use keeper_executor::ExecutorError;

/// Errors that end a `bheekeeper` invocation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CliError {
    /// An error propagated from the executor layer.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// `destroy` was asked for a VM with no device node.
    #[error("VM does not exist: {0}")]
    NotRunning(String),

    /// The boot script could not be read.
    #[error("cannot read boot script {}: {source}", .path.display())]
    BootScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing to stdout failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    /// The status could not be encoded.
    #[error("failed to encode status: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code: 1 for bad input, 2 for operational failures.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Executor(ExecutorError::Core(_)) | Self::BootScript { .. } => 1,
            _ => 2,
        }
    }
}
