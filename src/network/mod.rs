//! Secondary network classification
//!
//! A NetworkAttachmentDefinition carries its CNI configuration as an opaque
//! JSON string. It is either a single plugin (`{"type": "bridge", ...}`) or a
//! chained configuration (`{"plugins": [{"type": ...}, ...]}`). This module
//! decodes that document into [`NetworkConfig`] and maps it to the
//! [`NetworkKind`] that decides how probe VMs attach to the network.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;


/// Plugin types a probe VM can attach through
pub const SUPPORTED_PLUGIN_TYPES: &[&str] = &["bridge", "bridge-cnv", "cnv-bridge", "sriov"];

/// How a secondary network is implemented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkKind {
    Bridge,
    /// The bridge plugin shipped with OpenShift Virtualization
    CNVBridge,
    SRIOV,
    Unsupported,
}

impl NetworkKind {
    /// Classify a CNI plugin type name
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "bridge" => NetworkKind::Bridge,
            "bridge-cnv" | "cnv-bridge" => NetworkKind::CNVBridge,
            "sriov" => NetworkKind::SRIOV,
            _ => NetworkKind::Unsupported,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, NetworkKind::Unsupported)
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkKind::Bridge => "bridge",
            NetworkKind::CNVBridge => "cnv-bridge",
            NetworkKind::SRIOV => "sriov",
            NetworkKind::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// One entry of a CNI configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(rename = "type", default)]
    pub type_name: String,
}

/// Decoded CNI configuration of a NetworkAttachmentDefinition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkConfig {
    SinglePlugin(PluginConfig),
    PluginList(Vec<PluginConfig>),
}

/// Wire shape; both layouts share one object so the decision is explicit
#[derive(Deserialize)]
struct RawNetworkConfig {
    #[serde(rename = "type")]
    type_name: Option<String>,
    plugins: Option<Vec<PluginConfig>>,
}

impl NetworkConfig {
    /// Decode a CNI configuration document
    pub fn parse(raw: &str) -> Result<Self> {
        let decoded: RawNetworkConfig = serde_json::from_str(raw).map_err(|e| {
            AppError::parse(format!("failed to decode network configuration: {}", e))
        })?;

        match (decoded.plugins, decoded.type_name) {
            (Some(plugins), _) => Ok(NetworkConfig::PluginList(plugins)),
            (None, Some(type_name)) => Ok(NetworkConfig::SinglePlugin(PluginConfig { type_name })),
            (None, None) => Err(AppError::parse(
                "failed to decode network configuration: neither \"type\" nor \"plugins\" is set",
            )),
        }
    }

    /// The plugin type that decides the attachment.
    ///
    /// For a chain this is the first entry with a supported type, later and
    /// unsupported entries are ignored. A single plugin's type is returned as
    /// is, supported or not.
    pub fn network_type(&self) -> Option<&str> {
        match self {
            NetworkConfig::SinglePlugin(plugin) => Some(plugin.type_name.as_str()),
            NetworkConfig::PluginList(plugins) => plugins
                .iter()
                .map(|plugin| plugin.type_name.as_str())
                .find(|type_name| SUPPORTED_PLUGIN_TYPES.contains(type_name)),
        }
    }

    pub fn kind(&self) -> NetworkKind {
        self.network_type()
            .map(NetworkKind::from_type_name)
            .unwrap_or(NetworkKind::Unsupported)
    }
}

/// Plugin type of a raw CNI configuration; empty when a chain has no supported entry
pub fn resolve_network_type(raw: &str) -> Result<String> {
    let config = NetworkConfig::parse(raw)?;
    Ok(config.network_type().unwrap_or_default().to_string())
}

/// [`NetworkKind`] of a raw CNI configuration
pub fn resolve_network_kind(raw: &str) -> Result<NetworkKind> {
    Ok(NetworkConfig::parse(raw)?.kind())
}
