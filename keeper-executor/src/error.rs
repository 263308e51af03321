//! Error types for the executor crate.

use std::path::PathBuf;
use std::time::Duration;

use keeper_core::CoreError;

/// Errors that can occur during VM lifecycle operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// Volume metadata could not be queried.
    #[error("failed to load configuration for {target}: {reason}")]
    ConfigurationLoad { target: String, reason: String },

    /// No volume is tagged with the requested VM name.
    #[error("VM not found: {0}")]
    NotFound(String),

    /// Another volume is already tagged with this VM name.
    #[error("VM already exists: {0}")]
    AlreadyExists(String),

    /// `load` was called on a VM that is already loaded.
    #[error("VM {0} is already loaded")]
    AlreadyLoaded(String),

    /// The boot loader failed.
    #[error("failed to load VM {name}: {source}")]
    LoadFailed {
        name: String,
        #[source]
        source: Box<ExecutorError>,
    },

    /// The hypervisor failed to start or exited abnormally.
    #[error("failed to run VM {name}: {source}")]
    RunFailed {
        name: String,
        #[source]
        source: Box<ExecutorError>,
    },

    /// A bridge or tap interface could not be created or wired up.
    #[error("failed to allocate interface {interface}: {reason}")]
    ResourceAllocation { interface: String, reason: String },

    /// An external program could not be started.
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external program exited unsuccessfully.
    #[error("{program} failed ({status}){}", stderr_suffix(.stderr))]
    CommandFailed { program: PathBuf, status: String, stderr: String },

    /// An external program did not finish in time and was killed.
    #[error("{program} did not finish within {}s", .after.as_secs())]
    Timeout { program: PathBuf, after: Duration },

    /// One or more teardown steps failed for resources that existed.
    #[error("teardown of VM {name} incomplete: {}", .failures.join("; "))]
    TeardownFailed { name: String, failures: Vec<String> },

    /// Invalid domain value.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}
