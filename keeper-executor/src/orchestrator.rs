//! VM inventory over the tagged volumes of one host.
//!
//! The inventory is not cached: every call asks the volume service again, so
//! VMs created or removed by other processes show up immediately.

use std::sync::Arc;

use keeper_core::VmName;

use crate::backend::CommandRunner;
use crate::config::{Host, HostConfig};
use crate::vm::Vm;
use crate::zfs::{self, TaggedVolume};
use crate::ExecutorError;

/// Entry point for finding, creating and driving VMs.
pub struct Keeper<R: CommandRunner + 'static> {
    host: Arc<Host<R>>,
}

impl<R: CommandRunner + 'static> Keeper<R> {
    /// Keeper running host commands through `runner`.
    #[must_use]
    pub fn new(runner: R, config: HostConfig) -> Self {
        Self { host: Arc::new(Host::new(runner, config)) }
    }

    /// Host configuration in use.
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.host.config
    }

    /// Command runner in use.
    #[must_use]
    pub fn runner(&self) -> &R {
        &self.host.runner
    }

    /// Handle on VM `name` backed by `volume`, without checking the volume.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Core`] if `name` is not a valid VM name.
    pub fn vm(&self, name: &str, volume: impl Into<String>) -> Result<Vm<R>, ExecutorError> {
        Ok(Vm::new(Arc::clone(&self.host), VmName::new(name)?, volume))
    }

    /// Every VM whose volume carries the name tag at local scope.
    ///
    /// Tags that are not valid VM names are skipped with a warning.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConfigurationLoad`] if the inventory query fails.
    pub async fn all_vms(&self) -> Result<Vec<Vm<R>>, ExecutorError> {
        let tagged = zfs::tagged_volumes(&self.host.runner, &self.host.config).await?;
        Ok(tagged
            .into_iter()
            .filter_map(|TaggedVolume { name, volume }| match self.vm(&name, volume) {
                Ok(vm) => Some(vm),
                Err(e) => {
                    tracing::warn!(
                        name = %name,
                        error = %e,
                        "skipping volume with unusable name tag"
                    );
                    None
                }
            })
            .collect())
    }

    /// The VM called `name`, with its properties already read.
    ///
    /// If several volumes carry the same name, the first listed wins.
    ///
    /// # Errors
    /// Returns [`ExecutorError::NotFound`] if no volume carries the name, or
    /// [`ExecutorError::ConfigurationLoad`] if a query fails.
    pub async fn find_vm(&self, name: &str) -> Result<Vm<R>, ExecutorError> {
        let vm = self
            .all_vms()
            .await?
            .into_iter()
            .find(|vm| vm.name() == name)
            .ok_or_else(|| ExecutorError::NotFound(name.to_owned()))?;
        vm.properties().await?;
        Ok(vm)
    }

    /// Creates a `size_mb` megabyte volume for a new VM called `name`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::AlreadyExists`] if another volume already
    /// carries the name, [`ExecutorError::Core`] for an invalid name, or the
    /// volume service's error if creation fails.
    pub async fn create_vm(
        &self,
        name: &str,
        volume: &str,
        size_mb: u64,
    ) -> Result<Vm<R>, ExecutorError> {
        let vm_name = VmName::new(name)?;
        let tagged = zfs::tagged_volumes(&self.host.runner, &self.host.config).await?;
        if tagged.iter().any(|t| t.name == name) {
            return Err(ExecutorError::AlreadyExists(name.to_owned()));
        }
        zfs::create_volume(&self.host.runner, &self.host.config, name, volume, size_mb).await?;
        tracing::info!(vm = name, volume, "created");
        Ok(Vm::new(Arc::clone(&self.host), vm_name, volume))
    }
}
