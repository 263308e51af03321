//! Releasing a VM's host resources.
//!
//! A [`Teardown`] describes what to release: the kernel device node and the
//! tap with its bridge membership. [`CleanupGuard`] makes sure a teardown runs
//! once the hypervisor has been started, whichever way the run ends.

use std::sync::Arc;

use crate::backend::{CommandRunner, HostCommand};
use crate::config::Host;
use crate::discovery::device_node_exists;
use crate::network;
use crate::ExecutorError;

/// Resources of one VM to release.
pub(crate) struct Teardown<R> {
    host: Arc<Host<R>>,
    name: String,
    bridge: String,
    tap: Option<String>,
}

impl<R: CommandRunner> Teardown<R> {
    pub(crate) fn new(
        host: Arc<Host<R>>,
        name: String,
        bridge: String,
        tap: Option<String>,
    ) -> Self {
        Self { host, name, bridge, tap }
    }

    /// Releases everything that exists.
    ///
    /// Every step is attempted even if an earlier one fails. Nothing to
    /// release is not an error.
    pub(crate) async fn execute(&self) -> Result<(), ExecutorError> {
        let runner = &self.host.runner;
        let config = &self.host.config;
        let mut failures = Vec::new();

        if device_node_exists(&config.vmm_path(&self.name)).await {
            tracing::info!(vm = %self.name, "destroying kernel instance");
            let command = HostCommand::new(&config.bhyvectl)
                .arg(format!("--vm={}", self.name))
                .arg("--destroy")
                .timeout(config.command_timeout);
            if let Err(e) = runner.run(command).await {
                failures.push(format!("destroy instance: {e}"));
            }
        }

        if let Some(tap) = &self.tap {
            if !network::interface_exists(runner, config, tap).await {
                tracing::debug!(vm = %self.name, tap = %tap, "tap already gone");
                return self.finish(failures);
            }
            tracing::info!(vm = %self.name, tap = %tap, bridge = %self.bridge, "releasing tap");
            if let Err(e) = network::detach_tap(runner, config, &self.bridge, tap).await {
                failures.push(format!("detach {tap} from {}: {e}", self.bridge));
            }
            if let Err(e) = network::destroy_interface(runner, config, tap).await {
                failures.push(format!("destroy {tap}: {e}"));
            }
        }

        self.finish(failures)
    }

    fn finish(&self, failures: Vec<String>) -> Result<(), ExecutorError> {
        if failures.is_empty() {
            return Ok(());
        }
        for failure in &failures {
            tracing::warn!(vm = %self.name, %failure, "teardown step failed");
        }
        Err(ExecutorError::TeardownFailed { name: self.name.clone(), failures })
    }
}

/// Runs a [`Teardown`] on every exit path of a hypervisor run.
///
/// The normal path awaits [`CleanupGuard::release`]. If the guard is dropped
/// unreleased (the run future was cancelled or a panic unwound through it),
/// the teardown is spawned onto the current runtime instead.
pub(crate) struct CleanupGuard<R: CommandRunner + 'static> {
    plan: Option<Teardown<R>>,
}

impl<R: CommandRunner + 'static> CleanupGuard<R> {
    pub(crate) fn arm(plan: Teardown<R>) -> Self {
        Self { plan: Some(plan) }
    }

    /// Adds `tap` to what gets released.
    pub(crate) fn track_tap(&mut self, tap: String) {
        if let Some(plan) = &mut self.plan {
            plan.tap = Some(tap);
        }
    }

    /// Runs the teardown now and disarms the guard.
    pub(crate) async fn release(mut self) -> Result<(), ExecutorError> {
        match self.plan.take() {
            Some(plan) => plan.execute().await,
            None => Ok(()),
        }
    }
}

impl<R: CommandRunner + 'static> Drop for CleanupGuard<R> {
    fn drop(&mut self) {
        let Some(plan) = self.plan.take() else { return };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(vm = %plan.name, "run interrupted; tearing down in background");
                handle.spawn(async move {
                    if let Err(e) = plan.execute().await {
                        tracing::warn!(error = %e, "background teardown failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    vm = %plan.name,
                    "run interrupted outside a runtime; VM resources leaked"
                );
            }
        }
    }
}
