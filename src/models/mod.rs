//! Data models and structures for the VM latency checkup

pub mod config;
pub mod duration_str;
pub mod result;
pub mod vm;

// Re-export main model types
pub use config::{CheckupConfig, CheckupTimeouts};
pub use result::{CheckupResult, PingSample, Verdict};
pub use vm::{NetworkIdentity, ProbeAddressing, ProbeRole, ProbeVm};
