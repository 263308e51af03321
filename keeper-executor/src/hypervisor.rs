//! Hypervisor phase: the `bhyve` invocation and its fixed device topology.

use std::path::PathBuf;

use keeper_core::MacAddress;

use crate::backend::{CommandInput, HostCommand, OutputMode};
use crate::config::HostConfig;

/// Everything needed to start the hypervisor for one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypervisorSpec {
    /// VM name, also the kernel device node name.
    pub name: String,
    /// Virtual CPU count.
    pub cpus: String,
    /// Memory size in megabytes.
    pub mem: String,
    /// Block device of the volume.
    pub volume_path: PathBuf,
    /// Tap the network device is bound to.
    pub tap: String,
    /// Hardware address of the network device.
    pub mac: MacAddress,
    /// ISO attached as a CD-ROM behind the disk.
    pub cdrom: Option<String>,
}

impl HypervisorSpec {
    /// Arguments in slot order.
    ///
    /// Slot 0 host bridge, slot 1 LPC bridge, slot 2:0 virtio disk (2:1
    /// AHCI CD-ROM when an ISO is attached), slot 3 virtio-net, and `com1` on
    /// the caller's stdio.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_owned(),
            self.cpus.clone(),
            "-m".to_owned(),
            self.mem.clone(),
            "-A".to_owned(),
            "-P".to_owned(),
            "-H".to_owned(),
            "-s".to_owned(),
            "0,hostbridge".to_owned(),
            "-s".to_owned(),
            "1,lpc".to_owned(),
            "-s".to_owned(),
            format!("2:0,virtio-blk,{}", self.volume_path.display()),
        ];
        if let Some(iso) = &self.cdrom {
            args.push("-s".to_owned());
            args.push(format!("2:1,ahci-cd,{iso}"));
        }
        args.extend([
            "-s".to_owned(),
            format!("3,virtio-net,{},mac={}", self.tap, self.mac),
            "-l".to_owned(),
            "com1,stdio".to_owned(),
            self.name.clone(),
        ]);
        args
    }

    /// The hypervisor invocation, sharing the caller's stdio.
    #[must_use]
    pub fn command(&self, config: &HostConfig) -> HostCommand {
        HostCommand::new(&config.bhyve)
            .args(self.args())
            .stdin(CommandInput::Inherit)
            .stdout(OutputMode::Inherit)
            .stderr(OutputMode::Inherit)
            .timeout(config.hypervisor_timeout)
    }
}
