//! VM Latency Checkup
//!
//! Provisions two short-lived KubeVirt probe VMs on a secondary network,
//! samples ping round-trip latency between them over their serial consoles,
//! evaluates the result against a threshold and publishes the outcome into a
//! ConfigMap as a flat key-value map.

pub mod checkup;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod models;
pub mod network;
pub mod output;
pub mod ping;
pub mod preflight;
pub mod reporter;
pub mod vm;

// Re-export commonly used types
pub use checkup::Checkup;
pub use cluster::{ClusterError, ConsoleChannel, ControlPlane};
pub use error::{AppError, Result, Stage};
pub use models::{CheckupConfig, CheckupResult, PingSample, ProbeRole, ProbeVm, Verdict};
pub use network::NetworkKind;
pub use reporter::{ConfigMapReporter, ResultReporter, StdoutReporter};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Source probe VM secondary interface
    pub const SOURCE_MAC: &str = "02:00:00:f9:32:1f";
    pub const SOURCE_CIDR: &str = "192.168.0.100/24";

    /// Target probe VM secondary interface
    pub const TARGET_MAC: &str = "02:00:00:7b:55:76";
    pub const TARGET_CIDR: &str = "192.168.0.200/24";

    pub const VM_IMAGE: &str = "quay.io/kubevirt/fedora-with-test-tooling-container-disk:v0.49.0";
    pub const VM_MEMORY: &str = "512M";
    pub const VM_TERMINATION_GRACE_SECONDS: i64 = 0;

    /// Credentials baked into the probe image via cloud-init
    pub const CONSOLE_USER: &str = "fedora";
    pub const CONSOLE_PASSWORD: &str = "fedora";

    /// No-op command used to confirm a console is live
    pub const CONSOLE_LIVENESS_COMMAND: &str = "ip a";

    /// Ping arguments used when no sample duration is supplied
    pub const DEFAULT_PING_ARGS: &str = "-c 5 -w 10";

    pub const DEFAULT_VM_READY_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_VM_DELETE_TIMEOUT: Duration = Duration::from_secs(180);
    pub const DEFAULT_CONSOLE_LOGIN_TIMEOUT: Duration = Duration::from_secs(120);
    pub const DEFAULT_CONSOLE_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DEFAULT_SAMPLE_GRACE: Duration = Duration::from_secs(10);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// In-cluster service account material
    pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
}
