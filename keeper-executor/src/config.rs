//! Host configuration: external binaries, device directories and timeouts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on short host utilities (`zfs`, `ifconfig`, `fuser`, ...).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the external tools live and how long they may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct HostConfig {
    /// Volume metadata tool.
    pub zfs: PathBuf,
    /// Network interface control tool.
    pub ifconfig: PathBuf,
    /// Boot loader.
    pub grub_bhyve: PathBuf,
    /// Hypervisor.
    pub bhyve: PathBuf,
    /// Hypervisor control tool.
    pub bhyvectl: PathBuf,
    /// Lists processes holding a file open.
    pub fuser: PathBuf,
    /// Lists files a process holds open.
    pub fstat: PathBuf,

    /// Directory of per-VM kernel device nodes.
    pub vmm_dir: PathBuf,
    /// Directory exposing volumes as block devices.
    pub zvol_dir: PathBuf,

    /// Bound on the boot loader; `None` waits forever.
    pub loader_timeout: Option<Duration>,
    /// Bound on the hypervisor; `None` waits forever.
    pub hypervisor_timeout: Option<Duration>,
    /// Bound on every other host command.
    pub command_timeout: Option<Duration>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            zfs: PathBuf::from("zfs"),
            ifconfig: PathBuf::from("ifconfig"),
            grub_bhyve: PathBuf::from("grub-bhyve"),
            bhyve: PathBuf::from("bhyve"),
            bhyvectl: PathBuf::from("bhyvectl"),
            fuser: PathBuf::from("fuser"),
            fstat: PathBuf::from("fstat"),
            vmm_dir: PathBuf::from("/dev/vmm"),
            zvol_dir: PathBuf::from("/dev/zvol"),
            loader_timeout: None,
            hypervisor_timeout: None,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
        }
    }
}

impl HostConfig {
    /// Loads the configuration from `BHEEKEEPER_*` environment variables,
    /// falling back to [`HostConfig::default`] for anything unset.
    ///
    /// Unparsable timeout values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`HostConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let path = |key: &str, default: PathBuf| lookup(key).map_or(default, PathBuf::from);
        let secs = |key: &str, default: Option<Duration>| match lookup(key) {
            None => default,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(n) => Some(Duration::from_secs(n)),
                Err(e) => {
                    tracing::warn!(key, value = %raw, error = %e, "ignoring invalid timeout");
                    default
                }
            },
        };

        Self {
            zfs: path("BHEEKEEPER_ZFS", defaults.zfs),
            ifconfig: path("BHEEKEEPER_IFCONFIG", defaults.ifconfig),
            grub_bhyve: path("BHEEKEEPER_GRUB_BHYVE", defaults.grub_bhyve),
            bhyve: path("BHEEKEEPER_BHYVE", defaults.bhyve),
            bhyvectl: path("BHEEKEEPER_BHYVECTL", defaults.bhyvectl),
            fuser: path("BHEEKEEPER_FUSER", defaults.fuser),
            fstat: path("BHEEKEEPER_FSTAT", defaults.fstat),
            vmm_dir: path("BHEEKEEPER_VMM_DIR", defaults.vmm_dir),
            zvol_dir: path("BHEEKEEPER_ZVOL_DIR", defaults.zvol_dir),
            loader_timeout: secs("BHEEKEEPER_LOADER_TIMEOUT_SECS", defaults.loader_timeout),
            hypervisor_timeout: secs(
                "BHEEKEEPER_HYPERVISOR_TIMEOUT_SECS",
                defaults.hypervisor_timeout,
            ),
            command_timeout: secs("BHEEKEEPER_COMMAND_TIMEOUT_SECS", defaults.command_timeout),
        }
    }

    /// Kernel device node of the VM called `name`.
    #[must_use]
    pub fn vmm_path(&self, name: &str) -> PathBuf {
        self.vmm_dir.join(name)
    }

    /// Block device backing `volume`.
    #[must_use]
    pub fn volume_path(&self, volume: &str) -> PathBuf {
        self.zvol_dir.join(volume)
    }

    /// Sets the device directories, keeping everything else.
    #[must_use]
    pub fn with_device_dirs(
        mut self,
        vmm_dir: impl AsRef<Path>,
        zvol_dir: impl AsRef<Path>,
    ) -> Self {
        self.vmm_dir = vmm_dir.as_ref().to_owned();
        self.zvol_dir = zvol_dir.as_ref().to_owned();
        self
    }
}

/// A command runner paired with the configuration it runs under.
#[derive(Debug)]
pub struct Host<R> {
    /// Executes external programs.
    pub runner: R,
    /// Binary paths, device directories and timeouts.
    pub config: HostConfig,
}

impl<R> Host<R> {
    /// Pairs `runner` with `config`.
    #[must_use]
    pub fn new(runner: R, config: HostConfig) -> Self {
        Self { runner, config }
    }
}
