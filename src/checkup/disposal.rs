//! Probe VM teardown
//!
//! [`ProbeVmLease`] owns every probe VM from the moment it is created. The
//! checkup disposes the lease on all exit paths; if a lease is dropped
//! without being disposed (the run future was cancelled, for instance) its
//! `Drop` impl still fires off the deletes on the current runtime.

use crate::cluster::ControlPlane;
use crate::error::{AppError, Result};
use crate::logging::Logger;
use crate::models::{duration_str, CheckupTimeouts, ProbeVm};
use std::sync::Arc;
use tokio::time::{sleep, Instant};

pub struct ProbeVmLease {
    cluster: Arc<dyn ControlPlane>,
    timeouts: CheckupTimeouts,
    logger: Logger,
    vms: Vec<ProbeVm>,
    disposed: bool,
}

impl ProbeVmLease {
    pub fn new(cluster: Arc<dyn ControlPlane>, timeouts: CheckupTimeouts, logger: &Logger) -> Self {
        Self {
            cluster,
            timeouts,
            logger: logger.child("disposal"),
            vms: Vec::new(),
            disposed: false,
        }
    }

    /// Take ownership of a created VM
    pub fn track(&mut self, vm: ProbeVm) {
        self.vms.push(vm);
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }

    /// Delete every tracked VM and wait for each to be gone.
    ///
    /// All VMs are attempted even when one fails; the errors are combined.
    pub async fn dispose(mut self) -> Result<()> {
        self.disposed = true;
        let vms = std::mem::take(&mut self.vms);
        if vms.is_empty() {
            return Ok(());
        }

        let mut failures = Vec::new();
        for vm in &vms {
            match self.cluster.delete_vmi(&vm.namespace, &vm.name).await {
                Ok(()) => {
                    self.logger.info("Probe VM deletion requested").vm(vm).log().await;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => failures.push(format!("failed to delete {}: {}", vm, e)),
            }
        }

        let deadline = Instant::now() + self.timeouts.vm_delete;
        for vm in &vms {
            if let Err(message) = self.wait_deleted(vm, deadline).await {
                failures.push(message);
            }
        }

        if failures.is_empty() {
            self.logger
                .info("Probe VMs disposed")
                .field("count", vms.len())
                .log()
                .await;
            Ok(())
        } else {
            Err(AppError::disposal(failures.join("; ")))
        }
    }

    async fn wait_deleted(&self, vm: &ProbeVm, deadline: Instant) -> std::result::Result<(), String> {
        loop {
            match self.cluster.get_vmi(&vm.namespace, &vm.name).await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => {
                    self.logger
                        .warn("Failed to read probe VM during disposal")
                        .vm(vm)
                        .field("error", e.to_string())
                        .log()
                        .await;
                }
                Ok(_) => {}
            }

            if Instant::now() + self.timeouts.poll_interval > deadline {
                return Err(format!(
                    "{} still exists {} after deletion was requested",
                    vm,
                    duration_str::format(self.timeouts.vm_delete)
                ));
            }
            sleep(self.timeouts.poll_interval).await;
        }
    }
}

impl Drop for ProbeVmLease {
    fn drop(&mut self) {
        if self.disposed || self.vms.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            eprintln!(
                "probe VMs left behind, no runtime to delete them: {}",
                self.vms.iter().map(ProbeVm::qualified_name).collect::<Vec<_>>().join(", ")
            );
            return;
        };

        for vm in std::mem::take(&mut self.vms) {
            let cluster = self.cluster.clone();
            let logger = self.logger.clone();
            runtime.spawn(async move {
                let outcome = cluster.delete_vmi(&vm.namespace, &vm.name).await;
                let entry = match &outcome {
                    Ok(()) => logger.warn("Deleted probe VM of an abandoned run"),
                    Err(_) => logger.error("Failed to delete probe VM of an abandoned run"),
                };
                entry
                    .vm(&vm)
                    .field("error", outcome.err().map(|e| e.to_string()))
                    .log()
                    .await;
            });
        }
    }
}
