//! Checkup configuration data model

use crate::config::env::{
    DESIRED_MAX_LATENCY_ENV, NETWORK_NAMESPACE_ENV, NETWORK_NAME_ENV, SAMPLE_DURATION_ENV,
    SOURCE_NODE_ENV, TARGET_NODE_ENV,
};
use crate::models::duration_str;
use crate::models::vm::ProbeAddressing;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Immutable description of one checkup run.
///
/// Built once by [`crate::config::ConfigParser`] and passed by reference
/// through every stage; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckupConfig {
    /// Namespace of the ConfigMap receiving the results
    pub result_config_map_namespace: String,

    /// Name of the ConfigMap receiving the results
    pub result_config_map_name: String,

    /// Namespace the probe VMs are created in
    pub working_namespace: String,

    /// Namespace of the NetworkAttachmentDefinition under test
    pub network_namespace: String,

    /// Name of the NetworkAttachmentDefinition under test
    pub network_name: String,

    /// Node the source VM is pinned to
    pub source_node: String,

    /// Node the target VM is pinned to
    pub target_node: String,

    /// How long latency is sampled for
    #[serde(with = "duration_str")]
    pub sample_duration: Duration,

    /// Maximum latency that still passes the checkup
    #[serde(with = "duration_str")]
    pub max_desired_latency: Duration,

    /// MAC/CIDR pairs assigned to the probe VMs
    pub addressing: ProbeAddressing,

    /// Bounds for the waits the checkup performs
    #[serde(default)]
    pub timeouts: CheckupTimeouts,
}

/// Upper bounds for every blocking wait in a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckupTimeouts {
    #[serde(with = "duration_str")]
    pub vm_ready: Duration,
    #[serde(with = "duration_str")]
    pub vm_delete: Duration,
    #[serde(with = "duration_str")]
    pub console_login: Duration,
    #[serde(with = "duration_str")]
    pub console_command: Duration,
    /// Extra time granted on top of the sample duration for ping to print its summary
    #[serde(with = "duration_str")]
    pub sample_grace: Duration,
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
}

impl Default for CheckupTimeouts {
    fn default() -> Self {
        use crate::defaults::*;
        Self {
            vm_ready: DEFAULT_VM_READY_TIMEOUT,
            vm_delete: DEFAULT_VM_DELETE_TIMEOUT,
            console_login: DEFAULT_CONSOLE_LOGIN_TIMEOUT,
            console_command: DEFAULT_CONSOLE_COMMAND_TIMEOUT,
            sample_grace: DEFAULT_SAMPLE_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl CheckupConfig {
    /// `namespace/name` of the NetworkAttachmentDefinition, as multus references it
    pub fn network_reference(&self) -> String {
        format!("{}/{}", self.network_namespace, self.network_name)
    }

    /// Whole seconds of sampling, rounded up so sub-second remainders are not lost
    pub fn sample_seconds(&self) -> u64 {
        let secs = self.sample_duration.as_secs();
        if self.sample_duration.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Echo of the inputs, keyed by their environment variable names
    pub fn echoed_parameters(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            (NETWORK_NAMESPACE_ENV, self.network_namespace.clone()),
            (NETWORK_NAME_ENV, self.network_name.clone()),
            (SOURCE_NODE_ENV, self.source_node.clone()),
            (TARGET_NODE_ENV, self.target_node.clone()),
            (SAMPLE_DURATION_ENV, duration_str::format(self.sample_duration)),
            (DESIRED_MAX_LATENCY_ENV, duration_str::format(self.max_desired_latency)),
        ])
    }
}

#[cfg(test)]
pub(crate) fn sample_config() -> CheckupConfig {
    CheckupConfig {
        result_config_map_namespace: "kiagnose".to_string(),
        result_config_map_name: "latency-results".to_string(),
        working_namespace: "kiagnose".to_string(),
        network_namespace: "default".to_string(),
        network_name: "blue-net".to_string(),
        source_node: "worker-1".to_string(),
        target_node: "worker-2".to_string(),
        sample_duration: Duration::from_secs(10),
        max_desired_latency: Duration::from_millis(5),
        addressing: ProbeAddressing::fixed().unwrap(),
        timeouts: CheckupTimeouts::default(),
    }
}
