//! Control-plane access
//!
//! The checkup talks to the cluster only through [`ControlPlane`]. The real
//! implementation ([`kube::KubeClient`]) speaks the Kubernetes REST API and the
//! KubeVirt console websocket; `fake::FakeCluster` keeps everything in memory
//! for tests and is only built with `cfg(test)` or the `test-support` feature.

#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod kube;
pub mod resources;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeCluster, FakeShell};
pub use kube::KubeClient;
pub use resources::{
    ConfigMap, KubeVirt, NetworkAttachmentDefinition, ObjectMeta, VirtualMachineInstance,
};

use async_trait::async_trait;
use thiserror::Error;

/// Failures reported by a control-plane implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The API server answered with a non-success status
    #[error("API server returned {status} for {resource}: {message}")]
    Api {
        status: u16,
        resource: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode {resource}: {message}")]
    Decode { resource: String, message: String },

    #[error("console channel error: {0}")]
    Console(String),

    /// A bounded wait on the control plane expired
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid client setup: {0}")]
    Setup(String),
}

impl ClusterError {
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Operations the checkup needs from the control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_config_map(&self, namespace: &str, name: &str) -> ClusterResult<ConfigMap>;

    /// Replace a ConfigMap; no resourceVersion precondition is applied
    async fn update_config_map(&self, config_map: &ConfigMap) -> ClusterResult<ConfigMap>;

    /// All KubeVirt installation resources, cluster wide
    async fn list_kubevirts(&self) -> ClusterResult<Vec<KubeVirt>>;

    async fn get_network_attachment_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<NetworkAttachmentDefinition>;

    async fn create_vmi(&self, vmi: &VirtualMachineInstance) -> ClusterResult<VirtualMachineInstance>;

    async fn get_vmi(&self, namespace: &str, name: &str) -> ClusterResult<VirtualMachineInstance>;

    async fn delete_vmi(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// Attach to the serial console of a running VMI
    async fn open_console(&self, namespace: &str, name: &str) -> ClusterResult<Box<dyn ConsoleChannel>>;
}

/// Raw byte stream to and from a VM serial console
#[async_trait]
pub trait ConsoleChannel: Send {
    async fn send(&mut self, data: &[u8]) -> ClusterResult<()>;

    /// Next chunk of output; `None` once the channel is closed
    async fn recv(&mut self) -> ClusterResult<Option<Vec<u8>>>;

    async fn close(&mut self) -> ClusterResult<()> {
        Ok(())
    }
}
