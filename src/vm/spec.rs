//! Probe VMI manifests
//!
//! Both probe VMs come from one base: the Fedora test-tooling container disk,
//! fixed memory, an RNG device and a zero termination grace period. Each adds
//! its role-specific MAC, address and node, plus a secondary interface bound
//! according to the network's [`AttachmentStrategy`].

use crate::cluster::resources::{
    CloudInitNoCloudSource, ContainerDiskSource, Devices, Disk, DiskTarget, DomainSpec, EmptyObject,
    Interface, MultusNetwork, Network, ObjectMeta, ResourceRequirements, VirtualMachineInstance, VmiSpec,
    Volume, KUBEVIRT_API_VERSION, VMI_KIND,
};
use crate::defaults::{CONSOLE_PASSWORD, VM_IMAGE, VM_MEMORY, VM_TERMINATION_GRACE_SECONDS};
use crate::error::{AppError, Result};
use crate::models::{CheckupConfig, ProbeRole, ProbeVm};
use crate::network::NetworkKind;
use std::collections::BTreeMap;

/// Name of the secondary interface and its network in the VMI spec
pub const SECONDARY_INTERFACE: &str = "secondary";

const CONTAINER_DISK: &str = "containerdisk";
const CLOUD_INIT_DISK: &str = "cloudinitdisk";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const RUN_LABEL: &str = "vm-latency-checkup/run";
pub const ROLE_LABEL: &str = "vm-latency-checkup/role";
const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// How the secondary interface is bound to its network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentStrategy {
    Bridge,
    Sriov,
}

impl AttachmentStrategy {
    /// Strategy for a network kind; unsupported networks are rejected
    pub fn for_kind(kind: NetworkKind) -> Result<Self> {
        match kind {
            NetworkKind::Bridge | NetworkKind::CNVBridge => Ok(AttachmentStrategy::Bridge),
            NetworkKind::SRIOV => Ok(AttachmentStrategy::Sriov),
            NetworkKind::Unsupported => Err(AppError::provisioning(format!(
                "no attachment strategy for an unsupported network; supported plugin types are {}",
                crate::network::SUPPORTED_PLUGIN_TYPES.join(", ")
            ))),
        }
    }

    fn interface(&self, mac: String) -> Interface {
        let mut interface = Interface {
            name: SECONDARY_INTERFACE.to_string(),
            mac_address: Some(mac),
            ..Interface::default()
        };
        match self {
            AttachmentStrategy::Bridge => interface.bridge = Some(EmptyObject {}),
            AttachmentStrategy::Sriov => interface.sriov = Some(EmptyObject {}),
        }
        interface
    }
}

/// Builds the probe VMs of one run
#[derive(Debug, Clone)]
pub struct ProbeVmFactory<'a> {
    config: &'a CheckupConfig,
    strategy: AttachmentStrategy,
    run_id: String,
}

impl<'a> ProbeVmFactory<'a> {
    pub fn new(config: &'a CheckupConfig, strategy: AttachmentStrategy, run_id: impl Into<String>) -> Self {
        Self {
            config,
            strategy,
            run_id: run_id.into(),
        }
    }

    /// Identity of the VM playing `role`
    pub fn probe_vm(&self, role: ProbeRole) -> ProbeVm {
        let node = match role {
            ProbeRole::Source => &self.config.source_node,
            ProbeRole::Target => &self.config.target_node,
        };
        ProbeVm {
            name: format!("latency-check-{}-{}", role, self.run_id),
            namespace: self.config.working_namespace.clone(),
            role,
            network: *self.config.addressing.for_role(role),
            node: node.clone(),
        }
    }

    pub fn manifest(&self, vm: &ProbeVm) -> VirtualMachineInstance {
        let mut metadata = ObjectMeta::named(&vm.namespace, &vm.name);
        metadata.labels = BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), crate::PKG_NAME.to_string()),
            (RUN_LABEL.to_string(), self.run_id.clone()),
            (ROLE_LABEL.to_string(), vm.role.as_str().to_string()),
        ]);

        let mut node_selector = BTreeMap::new();
        if !vm.node.is_empty() {
            node_selector.insert(HOSTNAME_LABEL.to_string(), vm.node.clone());
        }

        VirtualMachineInstance {
            api_version: KUBEVIRT_API_VERSION.to_string(),
            kind: VMI_KIND.to_string(),
            metadata,
            spec: VmiSpec {
                termination_grace_period_seconds: Some(VM_TERMINATION_GRACE_SECONDS),
                node_selector,
                domain: DomainSpec {
                    resources: ResourceRequirements {
                        requests: BTreeMap::from([("memory".to_string(), VM_MEMORY.to_string())]),
                    },
                    devices: Devices {
                        rng: Some(EmptyObject {}),
                        autoattach_pod_interface: Some(false),
                        disks: vec![virtio_disk(CONTAINER_DISK), virtio_disk(CLOUD_INIT_DISK)],
                        interfaces: vec![self.strategy.interface(vm.network.mac_string())],
                    },
                },
                networks: vec![Network {
                    name: SECONDARY_INTERFACE.to_string(),
                    multus: Some(MultusNetwork {
                        network_name: self.config.network_reference(),
                    }),
                }],
                volumes: vec![
                    Volume {
                        name: CONTAINER_DISK.to_string(),
                        container_disk: Some(ContainerDiskSource {
                            image: VM_IMAGE.to_string(),
                        }),
                        ..Volume::default()
                    },
                    Volume {
                        name: CLOUD_INIT_DISK.to_string(),
                        cloud_init_no_cloud: Some(CloudInitNoCloudSource {
                            user_data: Some(user_data()),
                            network_data: Some(network_data(vm)),
                        }),
                        ..Volume::default()
                    },
                ],
            },
            status: None,
        }
    }
}

fn virtio_disk(name: &str) -> Disk {
    Disk {
        name: name.to_string(),
        disk: DiskTarget {
            bus: "virtio".to_string(),
        },
    }
}

fn user_data() -> String {
    format!("#cloud-config\npassword: {}\nchpasswd: {{ expire: False }}\n", CONSOLE_PASSWORD)
}

/// Netplan v2 document assigning the static address to the secondary interface
fn network_data(vm: &ProbeVm) -> String {
    format!(
        "version: 2\n\
         ethernets:\n  \
           eth0:\n    \
             match:\n      \
               macaddress: \"{}\"\n    \
             addresses:\n      \
               - {}\n",
        vm.network.mac_string(),
        vm.network.cidr
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::sample_config;

    #[test]
    fn test_strategy_mapping_is_total() {
        assert_eq!(AttachmentStrategy::for_kind(NetworkKind::Bridge).unwrap(), AttachmentStrategy::Bridge);
        assert_eq!(AttachmentStrategy::for_kind(NetworkKind::CNVBridge).unwrap(), AttachmentStrategy::Bridge);
        assert_eq!(AttachmentStrategy::for_kind(NetworkKind::SRIOV).unwrap(), AttachmentStrategy::Sriov);

        let error = AttachmentStrategy::for_kind(NetworkKind::Unsupported).unwrap_err();
        assert_eq!(error.category(), "PROVISIONING");
        assert!(error.to_string().contains("sriov"));
    }

    #[test]
    fn test_probe_vm_identity() {
        let config = sample_config();
        let factory = ProbeVmFactory::new(&config, AttachmentStrategy::Bridge, "3f2a9c1d");

        let source = factory.probe_vm(ProbeRole::Source);
        let target = factory.probe_vm(ProbeRole::Target);
        assert_eq!(source.name, "latency-check-source-3f2a9c1d");
        assert_eq!(target.name, "latency-check-target-3f2a9c1d");
        assert_eq!(source.namespace, "kiagnose");
        assert_eq!(source.node, "worker-1");
        assert_eq!(target.node, "worker-2");
        assert_ne!(source.network, target.network);
    }

    #[test]
    fn test_bridge_manifest() {
        let config = sample_config();
        let factory = ProbeVmFactory::new(&config, AttachmentStrategy::Bridge, "run1");
        let vm = factory.probe_vm(ProbeRole::Source);
        let json = serde_json::to_value(factory.manifest(&vm)).unwrap();

        assert_eq!(json["apiVersion"], "kubevirt.io/v1");
        assert_eq!(json["kind"], "VirtualMachineInstance");
        assert_eq!(json["metadata"]["labels"][RUN_LABEL], "run1");
        assert_eq!(json["metadata"]["labels"][ROLE_LABEL], "source");
        assert_eq!(json["spec"]["terminationGracePeriodSeconds"], 0);
        assert_eq!(json["spec"]["nodeSelector"]["kubernetes.io/hostname"], "worker-1");
        assert_eq!(json["spec"]["domain"]["resources"]["requests"]["memory"], "512M");
        assert_eq!(json["spec"]["domain"]["devices"]["rng"], serde_json::json!({}));

        let iface = &json["spec"]["domain"]["devices"]["interfaces"][0];
        assert_eq!(iface["name"], SECONDARY_INTERFACE);
        assert_eq!(iface["macAddress"], "02:00:00:f9:32:1f");
        assert_eq!(iface["bridge"], serde_json::json!({}));
        assert!(iface.get("sriov").is_none());

        assert_eq!(json["spec"]["networks"][0]["multus"]["networkName"], "default/blue-net");
        assert_eq!(json["spec"]["volumes"][0]["containerDisk"]["image"], VM_IMAGE);

        let network_data = json["spec"]["volumes"][1]["cloudInitNoCloud"]["networkData"]
            .as_str()
            .unwrap();
        assert!(network_data.contains("macaddress: \"02:00:00:f9:32:1f\""));
        assert!(network_data.contains("- 192.168.0.100/24"));
    }

    #[test]
    fn test_sriov_manifest_without_pinning() {
        let mut config = sample_config();
        config.target_node = String::new();
        let factory = ProbeVmFactory::new(&config, AttachmentStrategy::Sriov, "run1");
        let vmi = factory.manifest(&factory.probe_vm(ProbeRole::Target));

        let iface = &vmi.spec.domain.devices.interfaces[0];
        assert!(iface.sriov.is_some());
        assert!(iface.bridge.is_none());
        assert_eq!(iface.mac_address.as_deref(), Some("02:00:00:7b:55:76"));
        assert!(vmi.spec.node_selector.is_empty());
    }
}
