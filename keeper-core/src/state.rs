//! Lifecycle state, hypervisor exit classification, and status snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::MacAddress;

/// In-memory lifecycle state of a VM handle. Never persisted.
///
/// Transitions only move forward (`Unloaded → Loaded → Running`) except for
/// destroy, which is allowed from every state and lands in `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    /// Boot loader has not run for this handle.
    #[default]
    Unloaded,
    /// Boot loader succeeded; the kernel device node holds the guest image.
    Loaded,
    /// Hypervisor process is executing the guest.
    Running,
    /// Torn down; may be loaded again.
    Destroyed,
}

impl VmState {
    /// True when the boot loader has run and no teardown happened since.
    #[must_use]
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Loaded | Self::Running)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// How a hypervisor process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypervisorExit {
    /// Exit 0: the guest rebooted.
    Rebooted,
    /// Exit 1: the guest powered off.
    PoweredOff,
    /// Exit 2: the guest halted.
    Halted,
    /// Exit 3: the guest triple-faulted.
    TripleFault,
    /// Any other exit code: the hypervisor itself failed.
    Error(i32),
    /// Killed by a signal.
    Signaled(i32),
}

impl HypervisorExit {
    /// Classifies a process exit from its code or terminating signal.
    #[must_use]
    pub fn classify(code: Option<i32>, signal: Option<i32>) -> Self {
        match (code, signal) {
            (Some(0), _) => Self::Rebooted,
            (Some(1), _) => Self::PoweredOff,
            (Some(2), _) => Self::Halted,
            (Some(3), _) => Self::TripleFault,
            (Some(code), _) => Self::Error(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::Error(-1),
        }
    }

    /// True for exits caused by the guest rather than a hypervisor failure.
    #[must_use]
    pub fn is_guest_exit(self) -> bool {
        !matches!(self, Self::Error(_) | Self::Signaled(_))
    }
}

impl fmt::Display for HypervisorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rebooted => f.write_str("rebooted"),
            Self::PoweredOff => f.write_str("powered off"),
            Self::Halted => f.write_str("halted"),
            Self::TripleFault => f.write_str("triple fault"),
            Self::Error(code) => write!(f, "exited with status {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

/// Point-in-time view of one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VmStatus {
    /// VM name.
    pub name: String,
    /// Backing volume dataset.
    pub volume: String,
    /// Whether the kernel device node is present.
    pub exists: bool,
    /// State of the in-memory handle.
    pub state: VmState,
    /// PID of the hypervisor process, when one was discovered.
    pub pid: Option<u32>,
    /// Tap interface, when allocated or discovered.
    pub tap: Option<String>,
    /// Derived hardware address.
    pub mac: MacAddress,
    /// Effective properties, defaults included.
    pub properties: BTreeMap<String, String>,
}

impl VmStatus {
    /// Creates a status snapshot.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        volume: String,
        exists: bool,
        state: VmState,
        pid: Option<u32>,
        tap: Option<String>,
        mac: MacAddress,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self { name, volume, exists, state, pid, tap, mac, properties }
    }
}
