//! Configuration parsing from CLI arguments and environment variables

use crate::{
    cli::Cli,
    config::env::*,
    config::validation::{ConfigValidator, ValidationWarning},
    defaults,
    error::{AppError, Result},
    logging::LogFormat,
    models::{duration_str, CheckupConfig, CheckupTimeouts, ProbeAddressing},
    models::vm::NetworkIdentity,
};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// How to reach the Kubernetes API server
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAccess {
    pub api_server: Url,
    pub token_file: PathBuf,
    /// CA bundle for the API server; system roots when absent
    pub ca_file: Option<PathBuf>,
}

/// Presentation settings, CLI only
#[derive(Debug, Clone, PartialEq)]
pub struct OutputOptions {
    pub stdout: bool,
    pub enable_color: bool,
    pub verbose: bool,
    pub debug: bool,
    pub log_format: LogFormat,
}

/// Everything the binary needs for one run
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub checkup: CheckupConfig,
    pub cluster: ClusterAccess,
    pub output: OutputOptions,
    pub warnings: Vec<ValidationWarning>,
}

/// Configuration parser that turns CLI arguments (with their environment
/// fallbacks) into one immutable [`AppConfig`]
pub struct ConfigParser {
    cli: Cli,
    service_account_dir: PathBuf,
}

impl ConfigParser {
    pub fn new(cli: Cli) -> Self {
        Self {
            cli,
            service_account_dir: PathBuf::from(defaults::SERVICE_ACCOUNT_DIR),
        }
    }

    /// Read in-cluster material from another directory
    pub fn with_service_account_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.service_account_dir = dir.into();
        self
    }

    /// Parse and build the complete configuration
    pub fn parse(&self) -> Result<AppConfig> {
        let checkup = self.build_checkup_config()?;
        let warnings = ConfigValidator::validate_comprehensive(&checkup)?;
        let cluster = self.build_cluster_access()?;
        let output = self.build_output_options();

        Ok(AppConfig {
            checkup,
            cluster,
            output,
            warnings,
        })
    }

    fn build_checkup_config(&self) -> Result<CheckupConfig> {
        let cli = &self.cli;

        Ok(CheckupConfig {
            result_config_map_namespace: required(
                &cli.result_configmap_namespace,
                RESULT_CONFIGMAP_NAMESPACE_ENV,
                "--result-configmap-namespace",
            )?,
            result_config_map_name: required(
                &cli.result_configmap_name,
                RESULT_CONFIGMAP_NAME_ENV,
                "--result-configmap-name",
            )?,
            working_namespace: self.working_namespace()?,
            network_namespace: required(&cli.network_namespace, NETWORK_NAMESPACE_ENV, "--network-namespace")?,
            network_name: required(&cli.network_name, NETWORK_NAME_ENV, "--network-name")?,
            source_node: optional(&cli.source_node),
            target_node: optional(&cli.target_node),
            sample_duration: required_duration(&cli.sample_duration, SAMPLE_DURATION_ENV, "--sample-duration")?,
            max_desired_latency: required_duration(
                &cli.max_desired_latency,
                DESIRED_MAX_LATENCY_ENV,
                "--max-desired-latency",
            )?,
            addressing: self.addressing()?,
            timeouts: self.timeouts()?,
        })
    }

    /// Flag or `POD_NAMESPACE`, then the service account namespace file
    fn working_namespace(&self) -> Result<String> {
        if let Some(namespace) = self.cli.working_namespace.as_deref().map(str::trim) {
            if !namespace.is_empty() {
                return Ok(namespace.to_string());
            }
        }

        let path = self.service_account_dir.join("namespace");
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => Ok(content.trim().to_string()),
            _ => Err(AppError::config(format!(
                "working namespace is not set: pass --working-namespace, set {} or run in-cluster ({} unreadable)",
                WORKING_NAMESPACE_ENV,
                path.display()
            ))),
        }
    }

    fn addressing(&self) -> Result<ProbeAddressing> {
        let cli = &self.cli;
        let fixed = ProbeAddressing::fixed()?;

        Ok(ProbeAddressing {
            source: override_identity(&cli.source_mac, &cli.source_cidr, fixed.source)?,
            target: override_identity(&cli.target_mac, &cli.target_cidr, fixed.target)?,
        })
    }

    fn timeouts(&self) -> Result<CheckupTimeouts> {
        let mut timeouts = CheckupTimeouts::default();
        if let Some(value) = &self.cli.vm_ready_timeout {
            timeouts.vm_ready = parse_flag_duration(value, "--vm-ready-timeout")?;
        }
        if let Some(value) = &self.cli.vm_delete_timeout {
            timeouts.vm_delete = parse_flag_duration(value, "--vm-delete-timeout")?;
        }
        if let Some(value) = &self.cli.console_timeout {
            timeouts.console_login = parse_flag_duration(value, "--console-timeout")?;
        }
        Ok(timeouts)
    }

    fn build_cluster_access(&self) -> Result<ClusterAccess> {
        let api_server = match &self.cli.api_server {
            Some(server) => Url::parse(server)?,
            None => in_cluster_api_server()?,
        };

        let token_file = self
            .cli
            .token_file
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.service_account_dir.join("token"));

        let ca_file = match &self.cli.ca_file {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let default_ca = self.service_account_dir.join("ca.crt");
                default_ca.exists().then_some(default_ca)
            }
        };

        Ok(ClusterAccess {
            api_server,
            token_file,
            ca_file,
        })
    }

    fn build_output_options(&self) -> OutputOptions {
        let cli = &self.cli;
        OutputOptions {
            stdout: cli.stdout,
            enable_color: cli.use_colors(),
            verbose: cli.verbose,
            debug: cli.debug,
            log_format: cli
                .log_format
                .unwrap_or(if cli.debug { LogFormat::Json } else { LogFormat::Console }),
        }
    }
}

fn required(value: &Option<String>, env_name: &str, flag: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(AppError::config(format!(
            "{} is required (set {} or pass {})",
            env_name, env_name, flag
        ))),
    }
}

/// Replace whichever half of a MAC/CIDR pair was given on the command line
fn override_identity(
    mac: &Option<String>,
    cidr: &Option<String>,
    base: NetworkIdentity,
) -> Result<NetworkIdentity> {
    if mac.is_none() && cidr.is_none() {
        return Ok(base);
    }
    let base_mac = base.mac_string();
    let base_cidr = base.cidr.to_string();
    NetworkIdentity::parse(
        mac.as_deref().unwrap_or(&base_mac),
        cidr.as_deref().unwrap_or(&base_cidr),
    )
}

fn optional(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn required_duration(value: &Option<String>, env_name: &str, flag: &str) -> Result<Duration> {
    let text = required(value, env_name, flag)?;
    duration_str::parse(&text)
        .map_err(|e| AppError::config(format!("{} has an invalid duration '{}': {}", env_name, text, e)))
}

fn parse_flag_duration(value: &str, flag: &str) -> Result<Duration> {
    duration_str::parse(value)
        .map_err(|e| AppError::config(format!("{} has an invalid duration '{}': {}", flag, value, e)))
}

fn in_cluster_api_server() -> Result<Url> {
    let host = std::env::var(KUBERNETES_SERVICE_HOST_ENV).map_err(|_| {
        AppError::config(format!(
            "--api-server not given and {} is not set; not running in-cluster?",
            KUBERNETES_SERVICE_HOST_ENV
        ))
    })?;
    let port = std::env::var(KUBERNETES_SERVICE_PORT_ENV).unwrap_or_else(|_| "443".to_string());

    let host = if host.contains(':') { format!("[{}]", host) } else { host };
    Ok(Url::parse(&format!("https://{}:{}", host, port))?)
}

/// Convenience function to load complete configuration from CLI arguments
pub fn load_config(cli: Cli) -> Result<AppConfig> {
    ConfigParser::new(cli).parse()
}

/// Display configuration summary for debug purposes
pub fn display_config_summary(config: &AppConfig) -> String {
    let checkup = &config.checkup;
    let mut summary = Vec::new();

    summary.push(format!(
        "Result ConfigMap: {}/{}",
        checkup.result_config_map_namespace, checkup.result_config_map_name
    ));
    summary.push(format!("Working Namespace: {}", checkup.working_namespace));
    summary.push(format!("Network: {}", checkup.network_reference()));
    summary.push(format!(
        "Nodes: {} -> {}",
        display_node(&checkup.source_node),
        display_node(&checkup.target_node)
    ));
    summary.push(format!("Sample Duration: {}", duration_str::format(checkup.sample_duration)));
    summary.push(format!("Max Desired Latency: {}", duration_str::format(checkup.max_desired_latency)));
    summary.push(format!("API Server: {}", config.cluster.api_server));
    summary.push(format!("Token File: {}", config.cluster.token_file.display()));
    summary.push(format!("Color Output: {}", config.output.enable_color));
    summary.push(format!("Verbose: {}", config.output.verbose));
    summary.push(format!("Debug: {}", config.output.debug));

    summary.join("\n")
}

fn display_node(node: &str) -> &str {
    if node.is_empty() { "<any>" } else { node }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_cli() -> Cli {
        Cli {
            result_configmap_namespace: Some("kiagnose".to_string()),
            result_configmap_name: Some("latency-results".to_string()),
            working_namespace: Some("kiagnose".to_string()),
            network_namespace: Some("default".to_string()),
            network_name: Some("blue-net".to_string()),
            source_node: Some("worker-1".to_string()),
            target_node: Some("worker-2".to_string()),
            sample_duration: Some("10s".to_string()),
            max_desired_latency: Some("5ms".to_string()),
            api_server: Some("https://10.0.0.1:6443".to_string()),
            ..Cli::default()
        }
    }

    fn parser(cli: Cli) -> (ConfigParser, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let parser = ConfigParser::new(cli).with_service_account_dir(dir.path());
        (parser, dir)
    }

    #[test]
    fn test_complete_configuration() {
        let (parser, _dir) = parser(complete_cli());
        let config = parser.parse().unwrap();

        assert_eq!(config.checkup.network_reference(), "default/blue-net");
        assert_eq!(config.checkup.sample_duration, Duration::from_secs(10));
        assert_eq!(config.checkup.max_desired_latency, Duration::from_millis(5));
        assert_eq!(config.checkup.addressing, ProbeAddressing::fixed().unwrap());
        assert_eq!(config.checkup.timeouts, CheckupTimeouts::default());
        assert_eq!(config.cluster.api_server.as_str(), "https://10.0.0.1:6443/");
        assert!(config.cluster.ca_file.is_none());
        assert_eq!(config.output.log_format, LogFormat::Console);
    }

    #[test]
    fn test_missing_value_names_env_var() {
        let cli = Cli {
            network_name: None,
            ..complete_cli()
        };
        let (parser, _dir) = parser(cli);
        let error = parser.parse().unwrap_err();

        assert_eq!(error.category(), "CONFIG");
        assert!(error.to_string().contains("NETWORK_NAME"));
        assert!(error.to_string().contains("--network-name"));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let cli = Cli {
            result_configmap_name: Some("   ".to_string()),
            ..complete_cli()
        };
        let (parser, _dir) = parser(cli);
        assert!(parser.parse().is_err());
    }

    #[test]
    fn test_invalid_duration() {
        let cli = Cli {
            sample_duration: Some("ten seconds".to_string()),
            ..complete_cli()
        };
        let (parser, _dir) = parser(cli);
        let error = parser.parse().unwrap_err();
        assert!(error.to_string().contains("SAMPLE_DURATION"));
    }

    #[test]
    fn test_working_namespace_from_service_account() {
        let cli = Cli {
            working_namespace: None,
            ..complete_cli()
        };
        let (parser, dir) = parser(cli);
        std::fs::write(dir.path().join("namespace"), "checkups\n").unwrap();
        std::fs::write(dir.path().join("ca.crt"), "").unwrap();

        let config = parser.parse().unwrap();
        assert_eq!(config.checkup.working_namespace, "checkups");
        assert_eq!(config.cluster.token_file, dir.path().join("token"));
        assert_eq!(config.cluster.ca_file, Some(dir.path().join("ca.crt")));
    }

    #[test]
    fn test_working_namespace_missing_everywhere() {
        let cli = Cli {
            working_namespace: None,
            ..complete_cli()
        };
        let (parser, _dir) = parser(cli);
        let error = parser.parse().unwrap_err();
        assert!(error.to_string().contains("POD_NAMESPACE"));
    }

    #[test]
    fn test_nodes_are_optional() {
        let cli = Cli {
            source_node: None,
            target_node: Some(" ".to_string()),
            ..complete_cli()
        };
        let (parser, _dir) = parser(cli);
        let config = parser.parse().unwrap();
        assert_eq!(config.checkup.source_node, "");
        assert_eq!(config.checkup.target_node, "");
    }

    #[test]
    fn test_address_and_timeout_overrides() {
        let cli = Cli {
            target_cidr: Some("10.10.0.2/16".to_string()),
            vm_ready_timeout: Some("10m".to_string()),
            console_timeout: Some("30s".to_string()),
            debug: true,
            ..complete_cli()
        };
        let (parser, _dir) = parser(cli);
        let config = parser.parse().unwrap();

        let target = config.checkup.addressing.target;
        assert_eq!(target.cidr.to_string(), "10.10.0.2/16");
        assert_eq!(target.mac_string(), defaults::TARGET_MAC);
        assert_eq!(config.checkup.timeouts.vm_ready, Duration::from_secs(600));
        assert_eq!(config.checkup.timeouts.console_login, Duration::from_secs(30));
        assert_eq!(config.output.log_format, LogFormat::Json);
    }

    #[test]
    fn test_config_summary() {
        let (parser, _dir) = parser(complete_cli());
        let config = parser.parse().unwrap();
        let summary = display_config_summary(&config);

        assert!(summary.contains("Network: default/blue-net"));
        assert!(summary.contains("Nodes: worker-1 -> worker-2"));
        assert!(summary.contains("Sample Duration: 10s"));
        assert!(summary.contains("Max Desired Latency: 5ms"));
    }
}
