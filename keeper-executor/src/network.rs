//! Bridge and tap interface control.
//!
//! Bridges are shared between VMs and created on first use. Taps belong to a
//! single VM and are always torn down together with their bridge membership.

use crate::backend::{CommandRunner, HostCommand, OutputMode};
use crate::config::HostConfig;
use crate::ExecutorError;

/// Name prefix of tap interfaces.
pub const TAP_PREFIX: &str = "tap";

fn ifconfig(config: &HostConfig) -> HostCommand {
    HostCommand::new(&config.ifconfig).timeout(config.command_timeout)
}

/// True when an interface called `name` exists.
pub async fn interface_exists<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    name: &str,
) -> bool {
    let command = ifconfig(config)
        .arg(name)
        .stdout(OutputMode::Null)
        .stderr(OutputMode::Null);
    match runner.execute(command).await {
        Ok(out) => out.is_success(),
        Err(e) => {
            tracing::warn!(interface = name, error = %e, "interface lookup failed");
            false
        }
    }
}

/// Creates bridge `name` unless it already exists.
///
/// Several VMs may race to create the same bridge. A failed create is
/// accepted when the bridge exists afterwards.
///
/// # Errors
/// Returns [`ExecutorError::ResourceAllocation`] if the bridge is missing and
/// cannot be created.
pub async fn ensure_bridge<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    name: &str,
) -> Result<(), ExecutorError> {
    if interface_exists(runner, config, name).await {
        return Ok(());
    }

    tracing::info!(bridge = name, "creating bridge");
    let Err(e) = runner.run(ifconfig(config).args([name, "create"])).await else {
        return Ok(());
    };
    if interface_exists(runner, config, name).await {
        tracing::debug!(bridge = name, error = %e, "bridge appeared concurrently");
        return Ok(());
    }
    Err(ExecutorError::ResourceAllocation { interface: name.to_owned(), reason: e.to_string() })
}

/// Creates a fresh tap and makes it a member of `bridge`.
///
/// The tap is destroyed again if it cannot join the bridge.
///
/// # Errors
/// Returns [`ExecutorError::ResourceAllocation`] if the tap cannot be created
/// or attached.
pub async fn allocate_tap<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    bridge: &str,
) -> Result<String, ExecutorError> {
    let allocation_failed = |reason: String| ExecutorError::ResourceAllocation {
        interface: TAP_PREFIX.to_owned(),
        reason,
    };

    let out = runner
        .run(ifconfig(config).args([TAP_PREFIX, "create"]))
        .await
        .map_err(|e| allocation_failed(e.to_string()))?;
    let tap = out.stdout.trim().to_owned();
    if !tap.starts_with(TAP_PREFIX) {
        return Err(allocation_failed(format!("unexpected interface name {tap:?}")));
    }

    if let Err(e) = runner.run(ifconfig(config).args([bridge, "addm", tap.as_str()])).await {
        if let Err(cleanup) = destroy_interface(runner, config, &tap).await {
            tracing::warn!(tap = %tap, error = %cleanup, "failed to destroy orphaned tap");
        }
        return Err(ExecutorError::ResourceAllocation { interface: tap, reason: e.to_string() });
    }

    tracing::info!(tap = %tap, bridge, "tap allocated");
    Ok(tap)
}

/// Removes `tap` from `bridge`.
///
/// # Errors
/// Returns [`ExecutorError::CommandFailed`] if the membership cannot be removed.
pub async fn detach_tap<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    bridge: &str,
    tap: &str,
) -> Result<(), ExecutorError> {
    runner.run(ifconfig(config).args([bridge, "deletem", tap])).await?;
    Ok(())
}

/// Destroys interface `name`.
///
/// # Errors
/// Returns [`ExecutorError::CommandFailed`] if the interface cannot be destroyed.
pub async fn destroy_interface<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    name: &str,
) -> Result<(), ExecutorError> {
    runner.run(ifconfig(config).args([name, "destroy"])).await?;
    Ok(())
}
