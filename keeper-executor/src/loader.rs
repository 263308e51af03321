//! Boot-loader phase: writes the device map and runs `grub-bhyve`.

use std::path::Path;

use keeper_core::properties::keys;
use keeper_core::{BootInput, DeviceMap, Properties};

use crate::backend::{CommandRunner, HostCommand, OutputMode};
use crate::config::HostConfig;
use crate::ExecutorError;

/// Device map for a VM: `hd0` is the volume, `cd0` the optional ISO.
#[must_use]
pub fn device_map(config: &HostConfig, volume: &str, properties: &Properties) -> DeviceMap {
    let map = DeviceMap::new(config.volume_path(volume));
    match properties.non_empty(keys::CDROM_ISO) {
        Some(iso) => map.with_cdrom(iso),
        None => map,
    }
}

/// The boot-loader invocation for VM `name`.
#[must_use]
pub fn loader_command(
    config: &HostConfig,
    name: &str,
    properties: &Properties,
    device_map_path: &Path,
    input: BootInput,
) -> HostCommand {
    HostCommand::new(&config.grub_bhyve)
        .arg("-r")
        .arg(properties.get(keys::GRUB_ROOT))
        .arg("-m")
        .arg(device_map_path.display().to_string())
        .arg("-M")
        .arg(properties.get(keys::MEM))
        .arg(name)
        .stdin(input)
        .stdout(OutputMode::Inherit)
        .stderr(OutputMode::Inherit)
        .timeout(config.loader_timeout)
}

/// Runs the boot loader for VM `name` backed by `volume`.
///
/// The device map lives in a temporary file removed when the loader exits.
///
/// # Errors
/// Returns [`ExecutorError::Io`] if the device map cannot be written, or the
/// runner's error if the loader fails to start, times out or exits non-zero.
pub async fn run_loader<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &HostConfig,
    name: &str,
    volume: &str,
    properties: &Properties,
    input: BootInput,
) -> Result<(), ExecutorError> {
    let map = device_map(config, volume, properties);
    let map_file = tempfile::Builder::new().prefix("bheekeeper_device.map_").tempfile()?;
    tokio::fs::write(map_file.path(), map.render()).await?;

    tracing::info!(vm = name, root = properties.get(keys::GRUB_ROOT), "running boot loader");
    runner
        .run(loader_command(config, name, properties, map_file.path(), input))
        .await?;
    Ok(())
}
