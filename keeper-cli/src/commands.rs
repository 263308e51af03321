//! Subcommand implementations.
//!
//! Each command writes its report to the given sink. Diagnostics go through
//! `tracing`, so stdout only carries command output and the serial console.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use keeper_core::ScriptedInput;
use keeper_executor::{CommandRunner, Keeper, RunReport};

use crate::cli::Command;
use crate::CliError;

/// Runs `command` against `keeper`.
///
/// # Errors
/// Returns whatever the command fails with.
pub async fn dispatch<R, W>(
    keeper: &Keeper<R>,
    command: Command,
    out: &mut W,
) -> Result<(), CliError>
where
    R: CommandRunner + 'static,
    W: Write,
{
    match command {
        Command::List => list(keeper, out).await,
        Command::Status { name, json } => status(keeper, &name, json, out).await,
        Command::Run { name, boot_script, script_interval_ms } => {
            let interval = Duration::from_millis(script_interval_ms);
            let script = match boot_script {
                Some(path) => Some(read_boot_script(&path, interval).await?),
                None => None,
            };
            let report = run(keeper, &name, script).await?;
            tracing::info!(
                vm = %name,
                exit = %report.exit,
                secs = report.duration.as_secs(),
                "guest stopped"
            );
            Ok(())
        }
        Command::Destroy { name } => destroy(keeper, &name, out).await,
        Command::Create { name, volume, size_mb } => {
            create(keeper, &name, &volume, size_mb, out).await
        }
    }
}

/// Prints every known VM, marking those with a device node.
///
/// # Errors
/// Returns [`CliError::Executor`] if the inventory cannot be read.
pub async fn list<R: CommandRunner + 'static, W: Write>(
    keeper: &Keeper<R>,
    out: &mut W,
) -> Result<(), CliError> {
    let vms = keeper.all_vms().await?;
    if vms.is_empty() {
        writeln!(out, "No VMs configured")?;
        return Ok(());
    }
    writeln!(out, "Configured VMs:")?;
    for vm in &vms {
        let marker = if vm.exists().await { '*' } else { ' ' };
        writeln!(out, " {marker}{}", vm.name())?;
    }
    Ok(())
}

/// Prints the status of VM `name`.
///
/// # Errors
/// Returns [`CliError::Executor`] if the VM cannot be found or read.
pub async fn status<R: CommandRunner + 'static, W: Write>(
    keeper: &Keeper<R>,
    name: &str,
    json: bool,
    out: &mut W,
) -> Result<(), CliError> {
    let status = keeper.find_vm(name).await?.status().await?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &status)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "Name: {}", status.name)?;
    writeln!(out, "Exists: {}", status.exists)?;
    writeln!(out, "ZFS Volume: {}", status.volume)?;
    writeln!(out, "MAC: {}", status.mac)?;
    if let Some(pid) = status.pid {
        writeln!(out, "PID: {pid}")?;
    }
    if let Some(tap) = &status.tap {
        writeln!(out, "Tap: {tap}")?;
    }
    writeln!(out, "Properties:")?;
    for (key, value) in &status.properties {
        writeln!(out, "  {key}: {value}")?;
    }
    Ok(())
}

/// Boots VM `name` and blocks until the guest stops.
///
/// # Errors
/// Returns [`CliError::Executor`] if loading or running fails.
pub async fn run<R: CommandRunner + 'static>(
    keeper: &Keeper<R>,
    name: &str,
    script: Option<ScriptedInput>,
) -> Result<RunReport, CliError> {
    let mut vm = keeper.find_vm(name).await?;
    if let Some(script) = script {
        vm.load_with(keeper_core::BootInput::Scripted(script)).await?;
    }
    Ok(vm.run().await?)
}

/// Destroys VM `name`.
///
/// Unlike the library call, asking to destroy a VM that does not exist is
/// reported as an error.
///
/// # Errors
/// Returns [`CliError::NotRunning`] if there is nothing to destroy.
pub async fn destroy<R: CommandRunner + 'static, W: Write>(
    keeper: &Keeper<R>,
    name: &str,
    out: &mut W,
) -> Result<(), CliError> {
    let mut vm = keeper.find_vm(name).await?;
    if !vm.exists().await {
        return Err(CliError::NotRunning(name.to_owned()));
    }
    writeln!(out, "Destroying: {name}")?;
    vm.destroy().await?;
    Ok(())
}

/// Creates the volume for a new VM.
///
/// # Errors
/// Returns [`CliError::Executor`] if the name is taken or creation fails.
pub async fn create<R: CommandRunner + 'static, W: Write>(
    keeper: &Keeper<R>,
    name: &str,
    volume: &str,
    size_mb: u64,
    out: &mut W,
) -> Result<(), CliError> {
    let vm = keeper.create_vm(name, volume, size_mb).await?;
    writeln!(out, "Created: {} on {}", vm.name(), vm.volume())?;
    Ok(())
}

/// Reads a boot script, one keystroke line per line of the file.
///
/// # Errors
/// Returns [`CliError::BootScript`] if the file cannot be read.
pub async fn read_boot_script(path: &Path, interval: Duration) -> Result<ScriptedInput, CliError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CliError::BootScript { path: path.to_owned(), source })?;
    Ok(ScriptedInput::new(text.lines().map(str::to_owned).collect()).with_interval(interval))
}
