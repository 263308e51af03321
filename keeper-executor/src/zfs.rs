//! Volume metadata service backed by `zfs`.
//!
//! VM configuration lives in user properties on the backing volume. The VM
//! inventory is the set of volumes carrying [`NAME_TAG`] at local scope.

use keeper_core::{Properties, NAME_TAG};

use crate::backend::{CommandRunner, HostCommand};
use crate::config::HostConfig;
use crate::ExecutorError;

/// Splits `zfs get -H` output into rows of tab-separated columns.
///
/// Blank lines are skipped.
#[must_use]
pub fn parse_tabular(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split('\t').map(str::to_owned).collect())
        .collect()
}

/// A volume tagged as backing a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedVolume {
    /// Value of the name tag.
    pub name: String,
    /// Volume dataset.
    pub volume: String,
}

async fn zfs_get<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    target: &str,
    args: &[&str],
) -> Result<Vec<Vec<String>>, ExecutorError> {
    let command = HostCommand::new(&config.zfs)
        .args(["get", "-H"])
        .args(args.iter().copied())
        .timeout(config.command_timeout);
    let out = runner.run(command).await.map_err(|e| ExecutorError::ConfigurationLoad {
        target: target.to_owned(),
        reason: e.to_string(),
    })?;
    Ok(parse_tabular(&out.stdout))
}

/// Lists volumes whose name tag is set locally.
///
/// Inherited or default-scope tags are excluded, so a parent dataset's tag
/// never turns its children into phantom VMs.
///
/// # Errors
/// Returns [`ExecutorError::ConfigurationLoad`] if the query fails.
pub async fn tagged_volumes<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
) -> Result<Vec<TaggedVolume>, ExecutorError> {
    let rows = zfs_get(
        runner,
        config,
        "volume inventory",
        &["-t", "volume", "-s", "local", "-o", "value,name", NAME_TAG],
    )
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match <[String; 2]>::try_from(row) {
            Ok([name, volume]) => Some(TaggedVolume { name, volume }),
            Err(row) => {
                tracing::warn!(?row, "skipping malformed inventory row");
                None
            }
        })
        .collect())
}

/// Reads every property of `volume` and keeps the VM namespace.
///
/// # Errors
/// Returns [`ExecutorError::ConfigurationLoad`] if the query fails.
pub async fn volume_properties<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    volume: &str,
) -> Result<Properties, ExecutorError> {
    let rows = zfs_get(runner, config, volume, &["-o", "property,value", "all", volume]).await?;
    Ok(Properties::from_metadata(rows.into_iter().filter_map(|mut row| {
        if row.len() < 2 {
            return None;
        }
        let value = row.swap_remove(1);
        let key = row.swap_remove(0);
        Some((key, value))
    })))
}

/// Creates a `size_mb` megabyte volume tagged as backing VM `name`.
///
/// # Errors
/// Returns [`ExecutorError::CommandFailed`] if the volume cannot be created.
pub async fn create_volume<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    name: &str,
    volume: &str,
    size_mb: u64,
) -> Result<(), ExecutorError> {
    tracing::info!(vm = name, volume, size_mb, "creating volume");
    let command = HostCommand::new(&config.zfs)
        .args(["create", "-V"])
        .arg(format!("{size_mb}M"))
        .arg("-o")
        .arg(format!("{NAME_TAG}={name}"))
        .arg(volume)
        .timeout(config.command_timeout);
    runner.run(command).await?;
    Ok(())
}
