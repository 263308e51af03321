//! Best-effort discovery of a running hypervisor and the tap it holds.
//!
//! Lookups here never fail the caller. A failed lookup is reported as
//! [`Discovery::Failed`] so it stays distinguishable from a confirmed absence,
//! but every current caller treats both as "not running".

use std::path::Path;

use crate::backend::{CommandRunner, HostCommand, OutputMode};
use crate::config::HostConfig;
use crate::network::TAP_PREFIX;

/// Outcome of a best-effort lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery<T> {
    /// The thing was found.
    Found(T),
    /// The lookup worked and the thing is not there.
    Absent,
    /// The lookup itself failed.
    Failed(String),
}

impl<T> Discovery<T> {
    /// The found value, collapsing both kinds of "not found".
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Absent | Self::Failed(_) => None,
        }
    }
}

/// Parses `fuser` output into the first PID it lists.
///
/// `fuser` prints PIDs on stdout, sometimes suffixed with access flags
/// (`1234c`); the flags are ignored.
#[must_use]
pub fn parse_fuser_pid(output: &str) -> Discovery<u32> {
    let Some(first) = output.split_whitespace().next() else {
        return Discovery::Absent;
    };
    let digits = first.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    match digits.parse::<u32>() {
        Ok(0) => Discovery::Failed("fuser reported pid 0".to_owned()),
        Ok(pid) => Discovery::Found(pid),
        Err(e) => Discovery::Failed(format!("unparsable pid {first:?}: {e}")),
    }
}

/// Picks the tap device out of `fstat -f /dev` output.
///
/// Rows are `USER CMD PID FD MOUNT INUM MODE SZ|DV R/W [NAME]`; the device
/// shows up in the `SZ|DV` column, or as a `/dev/...` path in `NAME`. The
/// first row naming a [`TAP_PREFIX`] device wins.
#[must_use]
pub fn parse_fstat_tap(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.split_whitespace()
            .skip(3)
            .map(|column| column.strip_prefix("/dev/").unwrap_or(column))
            .find(|column| is_tap_name(column))
            .map(str::to_owned)
    })
}

fn is_tap_name(device: &str) -> bool {
    device
        .strip_prefix(TAP_PREFIX)
        .is_some_and(|unit| !unit.is_empty() && unit.chars().all(|c| c.is_ascii_digit()))
}

/// True when the kernel device node at `path` is present.
///
/// A stat error other than "not found" (permission denied, for one) also
/// counts as present: the node may well be there, and callers only use this
/// to decide whether a destroy is worth attempting. The error is logged.
pub async fn device_node_exists(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "cannot stat device node; assuming it exists"
            );
            true
        }
    }
}

/// Finds the process holding `vmm_path` open.
pub async fn holder_pid<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    vmm_path: &Path,
) -> Discovery<u32> {
    let command = HostCommand::new(&config.fuser)
        .arg(vmm_path.display().to_string())
        .stderr(OutputMode::Null)
        .timeout(config.command_timeout);

    let discovery = match runner.execute(command).await {
        Ok(out) if out.is_success() || !out.stdout.trim().is_empty() => {
            parse_fuser_pid(&out.stdout)
        }
        Ok(out) => Discovery::Failed(format!("fuser {}", out.status_text())),
        Err(e) => Discovery::Failed(e.to_string()),
    };
    if let Discovery::Failed(reason) = &discovery {
        tracing::warn!(path = %vmm_path.display(), %reason, "hypervisor pid lookup failed");
    }
    discovery
}

/// Finds the tap device held open by process `pid`.
pub async fn attached_tap<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    pid: u32,
) -> Discovery<String> {
    let command = HostCommand::new(&config.fstat)
        .args(["-p".to_owned(), pid.to_string(), "-f".to_owned(), "/dev".to_owned()])
        .timeout(config.command_timeout);

    match runner.run(command).await {
        Ok(out) => parse_fstat_tap(&out.stdout).map_or(Discovery::Absent, Discovery::Found),
        Err(e) => {
            tracing::warn!(pid, error = %e, "tap lookup failed");
            Discovery::Failed(e.to_string())
        }
    }
}
