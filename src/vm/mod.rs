//! Probe VM provisioning
//!
//! Launches the probe VMs, waits for each to report Ready within a bound,
//! and proves their consoles are usable before sampling starts.

pub mod spec;

pub use spec::{AttachmentStrategy, ProbeVmFactory, SECONDARY_INTERFACE};

use crate::cluster::resources::VirtualMachineInstance;
use crate::cluster::ControlPlane;
use crate::console::ConsoleSession;
use crate::defaults::{CONSOLE_LIVENESS_COMMAND, CONSOLE_PASSWORD, CONSOLE_USER};
use crate::error::{AppError, Result};
use crate::logging::Logger;
use crate::models::{duration_str, CheckupTimeouts, ProbeVm};
use std::net::IpAddr;
use tokio::time::{sleep, Instant};

/// VMI phases from which a VM never becomes Ready
const TERMINAL_PHASES: &[&str] = &["Failed", "Succeeded"];

pub struct Provisioner<'a> {
    cluster: &'a dyn ControlPlane,
    timeouts: CheckupTimeouts,
    logger: Logger,
}

impl<'a> Provisioner<'a> {
    pub fn new(cluster: &'a dyn ControlPlane, timeouts: CheckupTimeouts, logger: &Logger) -> Self {
        Self {
            cluster,
            timeouts,
            logger: logger.child("provisioner"),
        }
    }

    /// Submit a VMI manifest
    pub async fn launch(&self, vm: &ProbeVm, manifest: &VirtualMachineInstance) -> Result<()> {
        self.cluster
            .create_vmi(manifest)
            .await
            .map_err(|e| AppError::provisioning(format!("failed to create {}: {}", vm, e)))?;

        self.logger.info("Probe VM created").vm(vm).log().await;
        Ok(())
    }

    /// Poll until the VMI reports Ready.
    ///
    /// Transient API errors are retried until the deadline; a VMI that
    /// disappears or reaches a terminal phase fails right away.
    pub async fn wait_ready(&self, vm: &ProbeVm) -> Result<VirtualMachineInstance> {
        let deadline = Instant::now() + self.timeouts.vm_ready;
        let mut last_phase = String::from("Unknown");

        loop {
            match self.cluster.get_vmi(&vm.namespace, &vm.name).await {
                Ok(vmi) if vmi.is_ready() => {
                    self.logger
                        .info("Probe VM is ready")
                        .vm(vm)
                        .field("scheduled_on", vmi.status.as_ref().and_then(|s| s.node_name.clone()))
                        .log()
                        .await;
                    return Ok(vmi);
                }
                Ok(vmi) => {
                    let phase = vmi.phase().unwrap_or("Unknown");
                    if TERMINAL_PHASES.contains(&phase) {
                        return Err(AppError::provisioning(format!(
                            "{} reached phase {} before becoming ready",
                            vm, phase
                        )));
                    }
                    if phase != last_phase {
                        self.logger
                            .debug("Waiting for probe VM")
                            .vm(vm)
                            .field("phase", phase)
                            .log()
                            .await;
                        last_phase = phase.to_string();
                    }
                }
                Err(e) if e.is_not_found() => {
                    return Err(AppError::provisioning(format!("{} disappeared while starting", vm)));
                }
                Err(e) => {
                    self.logger
                        .warn("Failed to read probe VM status")
                        .vm(vm)
                        .field("error", e.to_string())
                        .log()
                        .await;
                }
            }

            if Instant::now() + self.timeouts.poll_interval > deadline {
                return Err(AppError::readiness_timeout(format!(
                    "{} was not ready after {} (last phase: {})",
                    vm,
                    duration_str::format(self.timeouts.vm_ready),
                    last_phase
                )));
            }
            sleep(self.timeouts.poll_interval).await;
        }
    }

    /// Log in on the VM's console and run a no-op command.
    ///
    /// The logged-in session is handed back so it can be reused.
    pub async fn check_console(&self, vm: &ProbeVm) -> Result<ConsoleSession> {
        let mut session = ConsoleSession::open(self.cluster, vm, &self.logger).await?;
        session
            .login(CONSOLE_USER, CONSOLE_PASSWORD, self.timeouts.console_login)
            .await?;
        session
            .run_checked(CONSOLE_LIVENESS_COMMAND, self.timeouts.console_command)
            .await?;

        self.logger.info("Probe VM console is live").vm(vm).log().await;
        Ok(session)
    }
}

/// Address to ping on the target VM.
///
/// Prefers what the VMI reports for its secondary interface and falls back
/// to the statically assigned address.
pub fn target_address(vmi: &VirtualMachineInstance, vm: &ProbeVm) -> IpAddr {
    vmi.interface_status(SECONDARY_INTERFACE)
        .and_then(|status| {
            status
                .ip_address
                .iter()
                .chain(status.ip_addresses.iter())
                .find_map(|ip| ip.split('/').next()?.parse::<IpAddr>().ok())
        })
        .unwrap_or_else(|| vm.network.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{FakeCluster, Readiness};
    use crate::cluster::resources::{VmiInterfaceStatus, VmiStatus};
    use crate::cluster::FakeShell;
    use crate::models::config::sample_config;
    use crate::models::ProbeRole;
    use std::time::Duration;

    fn fast_timeouts() -> CheckupTimeouts {
        CheckupTimeouts {
            vm_ready: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            ..CheckupTimeouts::default()
        }
    }

    async fn launched(cluster: &FakeCluster) -> ProbeVm {
        let config = sample_config();
        let factory = ProbeVmFactory::new(&config, AttachmentStrategy::Bridge, "t1");
        let vm = factory.probe_vm(ProbeRole::Target);
        let provisioner = Provisioner::new(cluster, fast_timeouts(), &Logger::quiet("test"));
        provisioner.launch(&vm, &factory.manifest(&vm)).await.unwrap();
        vm
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_polls_until_ready() {
        let cluster = FakeCluster::new().with_readiness(Readiness::AfterPolls(3));
        let vm = launched(&cluster).await;
        let provisioner = Provisioner::new(&cluster, fast_timeouts(), &Logger::quiet("test"));

        let vmi = provisioner.wait_ready(&vm).await.unwrap();
        assert!(vmi.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_is_bounded() {
        let cluster = FakeCluster::new().with_readiness(Readiness::Never);
        let vm = launched(&cluster).await;
        let provisioner = Provisioner::new(&cluster, fast_timeouts(), &Logger::quiet("test"));

        let error = provisioner.wait_ready(&vm).await.unwrap_err();
        assert!(error.is_timeout());
        assert_eq!(error.exit_code(), 3);
        assert!(error.to_string().contains("10s"));
        assert!(error.to_string().contains("Scheduling"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_vmi_is_not_waited_for() {
        let cluster = FakeCluster::new().with_readiness(Readiness::Fails);
        let vm = launched(&cluster).await;
        let provisioner = Provisioner::new(&cluster, fast_timeouts(), &Logger::quiet("test"));

        let error = provisioner.wait_ready(&vm).await.unwrap_err();
        assert!(!error.is_timeout());
        assert_eq!(error.category(), "PROVISIONING");
        assert!(error.to_string().contains("Failed"));
    }

    #[tokio::test]
    async fn test_duplicate_launch_fails() {
        let cluster = FakeCluster::new();
        let config = sample_config();
        let factory = ProbeVmFactory::new(&config, AttachmentStrategy::Bridge, "t1");
        let vm = factory.probe_vm(ProbeRole::Source);
        let provisioner = Provisioner::new(&cluster, fast_timeouts(), &Logger::quiet("test"));

        provisioner.launch(&vm, &factory.manifest(&vm)).await.unwrap();
        let error = provisioner.launch(&vm, &factory.manifest(&vm)).await.unwrap_err();
        assert_eq!(error.category(), "PROVISIONING");
    }

    #[tokio::test]
    async fn test_check_console_runs_liveness_command() {
        let cluster = FakeCluster::new();
        let vm = launched(&cluster).await;
        let provisioner = Provisioner::new(&cluster, fast_timeouts(), &Logger::quiet("test"));
        provisioner.wait_ready(&vm).await.unwrap();

        provisioner.check_console(&vm).await.unwrap();
        assert_eq!(cluster.console_commands(), vec!["ip a", "echo $?"]);
    }

    #[tokio::test]
    async fn test_check_console_reports_failed_attach() {
        let cluster = FakeCluster::new().failing_console();
        let vm = launched(&cluster).await;
        let provisioner = Provisioner::new(&cluster, fast_timeouts(), &Logger::quiet("test"));
        provisioner.wait_ready(&vm).await.unwrap();

        let error = provisioner.check_console(&vm).await.unwrap_err();
        assert!(!error.is_timeout());
        assert_eq!(error.category(), "CONSOLE");
        assert_eq!(error.exit_code(), 4);
        assert!(error.to_string().contains("bad handshake"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_console_reports_unresponsive_console() {
        let cluster = FakeCluster::new().with_shell(FakeShell::default().silent());
        let vm = launched(&cluster).await;
        let provisioner = Provisioner::new(&cluster, fast_timeouts(), &Logger::quiet("test"));
        provisioner.wait_ready(&vm).await.unwrap();

        let error = provisioner.check_console(&vm).await.unwrap_err();
        assert!(error.is_timeout());
        assert_eq!(error.category(), "CONSOLE_TIMEOUT");
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn test_target_address_prefers_reported_ip() {
        let config = sample_config();
        let factory = ProbeVmFactory::new(&config, AttachmentStrategy::Bridge, "t1");
        let vm = factory.probe_vm(ProbeRole::Target);

        let mut vmi = factory.manifest(&vm);
        assert_eq!(target_address(&vmi, &vm).to_string(), "192.168.0.200");

        vmi.status = Some(VmiStatus {
            interfaces: vec![VmiInterfaceStatus {
                name: Some(SECONDARY_INTERFACE.to_string()),
                ip_addresses: vec!["fd10::200/64".to_string()],
                ..VmiInterfaceStatus::default()
            }],
            ..VmiStatus::default()
        });
        assert_eq!(target_address(&vmi, &vm).to_string(), "fd10::200");
    }
}
