//! Probe VM identity and network addressing

use crate::error::{AppError, Result};
use ipnetwork::IpNetwork;
use macaddr::MacAddr6;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;

/// Which end of the latency measurement a VM plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeRole {
    /// Runs ping
    Source,
    /// Gets pinged
    Target,
}

impl ProbeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeRole::Source => "source",
            ProbeRole::Target => "target",
        }
    }
}

impl fmt::Display for ProbeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static address of a probe VM on the secondary network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub mac: MacAddr6,
    pub cidr: IpNetwork,
}

impl NetworkIdentity {
    pub fn new(mac: MacAddr6, cidr: IpNetwork) -> Self {
        Self { mac, cidr }
    }

    /// Parse a MAC such as `02:00:00:f9:32:1f` and a CIDR such as `192.168.0.100/24`
    pub fn parse(mac: &str, cidr: &str) -> Result<Self> {
        let mac = mac
            .trim()
            .parse::<MacAddr6>()
            .map_err(|e| AppError::config(format!("Invalid MAC address '{}': {}", mac, e)))?;
        let cidr = cidr
            .trim()
            .parse::<IpNetwork>()
            .map_err(|e| AppError::config(format!("Invalid CIDR '{}': {}", cidr, e)))?;
        Ok(Self::new(mac, cidr))
    }

    /// Interface address without the prefix length
    pub fn ip(&self) -> IpAddr {
        self.cidr.ip()
    }

    /// Lower-case colon separated MAC, the form KubeVirt and netplan expect
    pub fn mac_string(&self) -> String {
        let b = self.mac.as_bytes();
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[derive(Serialize, Deserialize)]
struct NetworkIdentityText {
    mac: String,
    cidr: String,
}

impl Serialize for NetworkIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        NetworkIdentityText {
            mac: self.mac_string(),
            cidr: self.cidr.to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NetworkIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = NetworkIdentityText::deserialize(deserializer)?;
        NetworkIdentity::parse(&text.mac, &text.cidr).map_err(serde::de::Error::custom)
    }
}

/// Addresses of both probe VMs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeAddressing {
    pub source: NetworkIdentity,
    pub target: NetworkIdentity,
}

impl ProbeAddressing {
    /// The fixed MAC/CIDR pairs used when none are configured
    pub fn fixed() -> Result<Self> {
        use crate::defaults::{SOURCE_CIDR, SOURCE_MAC, TARGET_CIDR, TARGET_MAC};
        Ok(Self {
            source: NetworkIdentity::parse(SOURCE_MAC, SOURCE_CIDR)?,
            target: NetworkIdentity::parse(TARGET_MAC, TARGET_CIDR)?,
        })
    }

    pub fn for_role(&self, role: ProbeRole) -> &NetworkIdentity {
        match role {
            ProbeRole::Source => &self.source,
            ProbeRole::Target => &self.target,
        }
    }
}

/// One of the two short-lived VMs owned by a checkup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeVm {
    pub name: String,
    pub namespace: String,
    pub role: ProbeRole,
    pub network: NetworkIdentity,
    /// Node the VM is pinned to
    pub node: String,
}

impl ProbeVm {
    /// `namespace/name`, used in logs and error messages
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ProbeVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} VM {}/{}", self.role, self.namespace, self.name)
    }
}
