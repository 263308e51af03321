//! The per-VM lifecycle state machine.
//!
//! A [`Vm`] is a handle on one volume-backed VM. It caches the volume's
//! properties after the first read and the tap it allocated or discovered.
//! Lifecycle state lives only in the handle; the host is the source of truth
//! for whether the VM exists and which process runs it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use keeper_core::properties::{default_for, keys};
use keeper_core::{BootInput, HypervisorExit, MacAddress, Properties, VmName, VmState, VmStatus};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::backend::CommandRunner;
use crate::config::Host;
use crate::discovery::{self, Discovery};
use crate::hypervisor::HypervisorSpec;
use crate::teardown::{CleanupGuard, Teardown};
use crate::{loader, network, zfs, ExecutorError};

/// Outcome of a hypervisor run that ended with a guest exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct RunReport {
    /// How the guest ended.
    pub exit: HypervisorExit,
    /// When the hypervisor was started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time the hypervisor ran.
    pub duration: Duration,
}

/// Handle on one VM.
pub struct Vm<R: CommandRunner + 'static> {
    host: Arc<Host<R>>,
    name: VmName,
    volume: String,
    properties: OnceCell<Properties>,
    tap: Option<String>,
    state: VmState,
}

impl<R: CommandRunner + 'static> Vm<R> {
    /// Handle on VM `name` backed by `volume`. Properties are read on first use.
    #[must_use]
    pub fn new(host: Arc<Host<R>>, name: VmName, volume: impl Into<String>) -> Self {
        Self {
            host,
            name,
            volume: volume.into(),
            properties: OnceCell::new(),
            tap: None,
            state: VmState::Unloaded,
        }
    }

    /// Handle with properties already known, skipping the volume query.
    #[must_use]
    pub fn with_properties(
        host: Arc<Host<R>>,
        name: VmName,
        volume: impl Into<String>,
        properties: Properties,
    ) -> Self {
        let vm = Self::new(host, name, volume);
        // A fresh cell cannot already be set.
        let _ = vm.properties.set(properties);
        vm
    }

    /// VM name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Backing volume dataset.
    #[must_use]
    pub fn volume(&self) -> &str {
        &self.volume
    }

    /// Lifecycle state of this handle.
    #[must_use]
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Tap remembered by this handle, without asking the host.
    #[must_use]
    pub fn cached_tap(&self) -> Option<&str> {
        self.tap.as_deref()
    }

    /// Hardware address derived from the VM name.
    #[must_use]
    pub fn mac(&self) -> MacAddress {
        MacAddress::derive(self.name.as_str())
    }

    /// Kernel device node of this VM.
    #[must_use]
    pub fn vmm_path(&self) -> PathBuf {
        self.host.config.vmm_path(self.name.as_str())
    }

    /// Volume properties, read once and cached.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConfigurationLoad`] if the volume cannot be
    /// queried. A failed read is not cached.
    pub async fn properties(&self) -> Result<&Properties, ExecutorError> {
        self.properties
            .get_or_try_init(|| {
                zfs::volume_properties(&self.host.runner, &self.host.config, &self.volume)
            })
            .await
    }

    /// Effective value of property `key`: stored value, else default, else empty.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConfigurationLoad`] if the volume cannot be queried.
    pub async fn property(&self, key: &str) -> Result<&str, ExecutorError> {
        Ok(self.properties().await?.get(key))
    }

    /// Name of the bridge the VM attaches to, created if missing.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ResourceAllocation`] if the bridge cannot be created.
    pub async fn bridge(&self) -> Result<String, ExecutorError> {
        let bridge = self.property(keys::BRIDGE).await?.to_owned();
        network::ensure_bridge(&self.host.runner, &self.host.config, &bridge).await?;
        Ok(bridge)
    }

    /// True when the kernel device node is present.
    pub async fn exists(&self) -> bool {
        discovery::device_node_exists(&self.vmm_path()).await
    }

    /// PID of the hypervisor holding the device node open.
    pub async fn hypervisor_pid(&self) -> Discovery<u32> {
        if !self.exists().await {
            return Discovery::Absent;
        }
        discovery::holder_pid(&self.host.runner, &self.host.config, &self.vmm_path()).await
    }

    /// Tap of this VM.
    ///
    /// Returns the cached tap, else the tap held by a running hypervisor.
    /// Without either, a fresh tap is allocated on the bridge when `create`
    /// is set; otherwise no tap is returned and nothing is created.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ResourceAllocation`] if allocation fails.
    pub async fn tap(&mut self, create: bool) -> Result<Option<String>, ExecutorError> {
        if let Some(tap) = &self.tap {
            return Ok(Some(tap.clone()));
        }
        if let Some(tap) = self.discover_tap().await {
            tracing::debug!(vm = %self.name, tap = %tap, "discovered tap of running hypervisor");
            self.tap = Some(tap.clone());
            return Ok(Some(tap));
        }
        if !create {
            return Ok(None);
        }
        let bridge = self.bridge().await?;
        let tap = network::allocate_tap(&self.host.runner, &self.host.config, &bridge).await?;
        self.tap = Some(tap.clone());
        Ok(Some(tap))
    }

    async fn discover_tap(&self) -> Option<String> {
        let pid = self.hypervisor_pid().await.found()?;
        discovery::attached_tap(&self.host.runner, &self.host.config, pid).await.found()
    }

    /// Runs the boot loader with the input selected by the `grub:in` property.
    ///
    /// # Errors
    /// Returns [`ExecutorError::AlreadyLoaded`] if the handle is loaded,
    /// [`ExecutorError::ConfigurationLoad`] if properties cannot be read, or
    /// [`ExecutorError::LoadFailed`] if the loader fails or `grub:in` is malformed.
    pub async fn load(&mut self) -> Result<(), ExecutorError> {
        if self.state.is_loaded() {
            return Err(ExecutorError::AlreadyLoaded(self.name.to_string()));
        }
        let input = BootInput::from_property(self.properties().await?.explicit(keys::GRUB_IN))
            .map_err(|e| ExecutorError::LoadFailed {
                name: self.name.to_string(),
                source: Box::new(e.into()),
            })?;
        self.load_with(input).await
    }

    /// Runs the boot loader feeding it `input`.
    ///
    /// On failure a device node the loader itself left behind is destroyed
    /// and the handle's state is unchanged. An instance that existed before
    /// the call is never touched.
    ///
    /// # Errors
    /// Same as [`Vm::load`].
    pub async fn load_with(&mut self, input: BootInput) -> Result<(), ExecutorError> {
        if self.state.is_loaded() {
            return Err(ExecutorError::AlreadyLoaded(self.name.to_string()));
        }
        let properties = self.properties().await?;
        let preexisting = self.exists().await;
        let loaded = loader::run_loader(
            &self.host.runner,
            &self.host.config,
            self.name.as_str(),
            &self.volume,
            properties,
            input,
        )
        .await;

        if let Err(source) = loaded {
            tracing::warn!(vm = %self.name, error = %source, "boot loader failed");
            if preexisting {
                tracing::warn!(vm = %self.name, "instance predates this load; leaving it running");
            } else if let Err(e) = self.teardown_plan(None).execute().await {
                tracing::warn!(vm = %self.name, error = %e, "cleanup after failed load incomplete");
            }
            return Err(ExecutorError::LoadFailed {
                name: self.name.to_string(),
                source: Box::new(source),
            });
        }

        self.state = VmState::Loaded;
        tracing::info!(vm = %self.name, "loaded");
        Ok(())
    }

    /// Loads the VM unless this handle already did.
    ///
    /// # Errors
    /// Same as [`Vm::load`], except that an already loaded handle is fine.
    pub async fn ensure_loaded(&mut self) -> Result<(), ExecutorError> {
        if self.state.is_loaded() {
            return Ok(());
        }
        self.load().await
    }

    /// Boots the VM and runs it to completion on the caller's stdio.
    ///
    /// Once the hypervisor phase starts, the device node and the tap are
    /// released before this returns, whatever the outcome. If the future is
    /// dropped mid-run the release happens in the background. The handle
    /// ends up `Destroyed` with no tap.
    ///
    /// # Errors
    /// Returns load errors as for [`Vm::load`]. Configuration and
    /// bridge or tap allocation errors are returned as they are.
    /// [`ExecutorError::RunFailed`] means the hypervisor could not start,
    /// timed out, or exited without a guest exit status. A clean run whose
    /// teardown failed returns [`ExecutorError::TeardownFailed`].
    pub async fn run(&mut self) -> Result<RunReport, ExecutorError> {
        self.ensure_loaded().await?;

        let mut guard = CleanupGuard::arm(self.teardown_plan(self.tap.clone()));
        let outcome = self.supervise(&mut guard).await;
        let cleanup = guard.release().await;
        self.tap = None;
        self.state = VmState::Destroyed;

        match (outcome, cleanup) {
            (Ok(report), Ok(())) => {
                tracing::info!(
                    vm = %self.name,
                    exit = %report.exit,
                    secs = report.duration.as_secs(),
                    "run finished"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), cleanup) => {
                if let Err(teardown) = cleanup {
                    tracing::warn!(
                        vm = %self.name,
                        error = %teardown,
                        "teardown after failed run incomplete"
                    );
                }
                Err(e)
            }
        }
    }

    async fn supervise(&mut self, guard: &mut CleanupGuard<R>) -> Result<RunReport, ExecutorError> {
        let properties = self.properties().await?;
        let cpus = properties.get(keys::CPUS).to_owned();
        let mem = properties.get(keys::MEM).to_owned();
        let cdrom = properties.non_empty(keys::CDROM_ISO).map(str::to_owned);

        let tap = self.tap(true).await?.ok_or_else(|| ExecutorError::ResourceAllocation {
            interface: network::TAP_PREFIX.to_owned(),
            reason: "no tap available".to_owned(),
        })?;
        guard.track_tap(tap.clone());

        let spec = HypervisorSpec {
            name: self.name.to_string(),
            cpus,
            mem,
            volume_path: self.host.config.volume_path(&self.volume),
            tap,
            mac: self.mac(),
            cdrom,
        };

        self.state = VmState::Running;
        tracing::info!(vm = %self.name, tap = %spec.tap, mac = %spec.mac, "starting hypervisor");
        let started_at = Utc::now();
        let clock = Instant::now();
        let run_failed = |source: ExecutorError| ExecutorError::RunFailed {
            name: self.name.to_string(),
            source: Box::new(source),
        };
        let out = self
            .host
            .runner
            .execute(spec.command(&self.host.config))
            .await
            .map_err(run_failed)?;
        let duration = clock.elapsed();

        let exit = HypervisorExit::classify(out.code, out.signal);
        if !exit.is_guest_exit() {
            return Err(run_failed(ExecutorError::CommandFailed {
                program: self.host.config.bhyve.clone(),
                status: exit.to_string(),
                stderr: out.stderr,
            }));
        }
        Ok(RunReport { exit, started_at, duration })
    }

    /// Releases the device node and the tap.
    ///
    /// Safe to call in any state and more than once. A tap held by a
    /// running hypervisor is discovered and released even if this handle
    /// never allocated it.
    ///
    /// # Errors
    /// Returns [`ExecutorError::TeardownFailed`] if releasing an existing
    /// resource failed. The handle is `Destroyed` with no tap either way.
    pub async fn destroy(&mut self) -> Result<(), ExecutorError> {
        let tap = match self.tap.take() {
            Some(tap) => Some(tap),
            None => self.discover_tap().await,
        };
        if tap.is_some() {
            if let Err(e) = self.properties().await {
                tracing::warn!(
                    vm = %self.name,
                    error = %e,
                    "properties unavailable; detaching from default bridge"
                );
            }
        }

        let result = self.teardown_plan(tap).execute().await;
        self.tap = None;
        self.state = VmState::Destroyed;
        tracing::info!(vm = %self.name, "destroyed");
        result
    }

    /// Point-in-time status, including the host's view of the VM.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConfigurationLoad`] if properties cannot be read.
    pub async fn status(&self) -> Result<VmStatus, ExecutorError> {
        let properties = self.properties().await?.resolved();
        let exists = self.exists().await;
        let pid = if exists { self.hypervisor_pid().await.found() } else { None };
        let tap = match (&self.tap, pid) {
            (Some(tap), _) => Some(tap.clone()),
            (None, Some(pid)) => {
                discovery::attached_tap(&self.host.runner, &self.host.config, pid)
                    .await
                    .found()
            }
            (None, None) => None,
        };
        Ok(VmStatus::new(
            self.name.to_string(),
            self.volume.clone(),
            exists,
            self.state,
            pid,
            tap,
            self.mac(),
            properties,
        ))
    }

    fn teardown_plan(&self, tap: Option<String>) -> Teardown<R> {
        let bridge = match self.properties.get() {
            Some(properties) => properties.get(keys::BRIDGE).to_owned(),
            None => default_for(keys::BRIDGE).unwrap_or_default().to_owned(),
        };
        Teardown::new(Arc::clone(&self.host), self.name.to_string(), bridge, tap)
    }
}

impl<R: CommandRunner + 'static> std::fmt::Debug for Vm<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("name", &self.name)
            .field("volume", &self.volume)
            .field("tap", &self.tap)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
