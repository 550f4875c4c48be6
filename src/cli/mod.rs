//! Command-line interface

use crate::config::env::*;
use crate::logging::LogFormat;
use clap::Parser;

/// VM Latency Checkup - measure latency between two KubeVirt VMs on a secondary network
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "vm-latency-checkup")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Namespace of the ConfigMap receiving the results
    #[arg(long, env = RESULT_CONFIGMAP_NAMESPACE_ENV)]
    pub result_configmap_namespace: Option<String>,

    /// Name of the ConfigMap receiving the results
    #[arg(long, env = RESULT_CONFIGMAP_NAME_ENV)]
    pub result_configmap_name: Option<String>,

    /// Namespace the probe VMs are created in [default: service account namespace]
    #[arg(long, env = WORKING_NAMESPACE_ENV)]
    pub working_namespace: Option<String>,

    /// Namespace of the NetworkAttachmentDefinition under test
    #[arg(long, env = NETWORK_NAMESPACE_ENV)]
    pub network_namespace: Option<String>,

    /// Name of the NetworkAttachmentDefinition under test
    #[arg(long, env = NETWORK_NAME_ENV)]
    pub network_name: Option<String>,

    /// Node the source VM is pinned to
    #[arg(long, env = SOURCE_NODE_ENV)]
    pub source_node: Option<String>,

    /// Node the target VM is pinned to
    #[arg(long, env = TARGET_NODE_ENV)]
    pub target_node: Option<String>,

    /// Latency sampling window (e.g. "30s", "2m")
    #[arg(long, env = SAMPLE_DURATION_ENV)]
    pub sample_duration: Option<String>,

    /// Maximum latency that still passes (e.g. "5ms")
    #[arg(long, env = DESIRED_MAX_LATENCY_ENV)]
    pub max_desired_latency: Option<String>,

    /// MAC address of the source VM secondary interface
    #[arg(long)]
    pub source_mac: Option<String>,

    /// Address of the source VM secondary interface, in CIDR notation
    #[arg(long)]
    pub source_cidr: Option<String>,

    /// MAC address of the target VM secondary interface
    #[arg(long)]
    pub target_mac: Option<String>,

    /// Address of the target VM secondary interface, in CIDR notation
    #[arg(long)]
    pub target_cidr: Option<String>,

    /// How long to wait for both VMs to become ready
    #[arg(long)]
    pub vm_ready_timeout: Option<String>,

    /// How long to wait for the VMs to disappear after deletion
    #[arg(long)]
    pub vm_delete_timeout: Option<String>,

    /// How long to wait for the console login prompt
    #[arg(long)]
    pub console_timeout: Option<String>,

    /// Kubernetes API server URL [default: in-cluster service]
    #[arg(long)]
    pub api_server: Option<String>,

    /// Bearer token file [default: service account token]
    #[arg(long)]
    pub token_file: Option<String>,

    /// CA bundle used to verify the API server [default: service account CA]
    #[arg(long)]
    pub ca_file: Option<String>,

    /// Also print the result map to stdout as JSON
    #[arg(long)]
    pub stdout: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Log at debug level
    #[arg(long)]
    pub verbose: bool,

    /// Log at trace level, including console traffic, as JSON
    #[arg(long)]
    pub debug: bool,

    /// Log line format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Print the supported environment variables and exit
    #[arg(long)]
    pub env_help: bool,

    /// Write an example .env file to PATH and exit
    #[arg(long, value_name = "PATH")]
    pub write_env_example: Option<String>,
}

impl Cli {
    /// Check if colors should be enabled
    pub fn use_colors(&self) -> bool {
        !self.no_color && supports_color()
    }
}

/// Check if the terminal supports color output
fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    cfg!(unix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_all_options() {
        let cli = Cli::parse_from([
            "test",
            "--result-configmap-namespace", "kiagnose",
            "--result-configmap-name", "results",
            "--working-namespace", "kiagnose",
            "--network-namespace", "default",
            "--network-name", "blue-net",
            "--source-node", "worker-1",
            "--target-node", "worker-2",
            "--sample-duration", "30s",
            "--max-desired-latency", "5ms",
            "--vm-ready-timeout", "10m",
            "--stdout",
            "--no-color",
            "--debug",
            "--log-format", "json",
        ]);

        assert_eq!(cli.result_configmap_name.as_deref(), Some("results"));
        assert_eq!(cli.network_name.as_deref(), Some("blue-net"));
        assert_eq!(cli.sample_duration.as_deref(), Some("30s"));
        assert_eq!(cli.max_desired_latency.as_deref(), Some("5ms"));
        assert_eq!(cli.vm_ready_timeout.as_deref(), Some("10m"));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(cli.stdout);
        assert!(cli.no_color);
        assert!(cli.debug);
        assert!(!cli.use_colors());
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["test", "--log-format", "xml"]).is_err());
    }
}
