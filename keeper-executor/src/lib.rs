//! bhyve VM lifecycle management on a single FreeBSD host.
//!
//! Discovers VMs from tagged zfs volumes, wires them onto bridged taps, runs
//! the boot loader and the hypervisor, and tears everything down again. All
//! host interaction goes through the [`CommandRunner`] seam.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod config;
pub mod discovery;
pub mod error;
pub mod hypervisor;
pub mod loader;
pub mod network;
pub mod orchestrator;
pub mod system;
mod teardown;
pub mod vm;
pub mod zfs;

pub use backend::{CommandInput, CommandOutput, CommandRunner, HostCommand, OutputMode};
pub use config::{Host, HostConfig};
pub use discovery::Discovery;
pub use error::ExecutorError;
pub use hypervisor::HypervisorSpec;
pub use orchestrator::Keeper;
pub use system::SystemRunner;
pub use vm::{RunReport, Vm};
pub use zfs::TaggedVolume;
