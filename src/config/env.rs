//! Environment variable handling and .env file management

use crate::error::{AppError, Result};
use std::path::Path;

pub const RESULT_CONFIGMAP_NAMESPACE_ENV: &str = "RESULT_CONFIGMAP_NAMESPACE";
pub const RESULT_CONFIGMAP_NAME_ENV: &str = "RESULT_CONFIGMAP_NAME";
pub const WORKING_NAMESPACE_ENV: &str = "POD_NAMESPACE";
pub const NETWORK_NAMESPACE_ENV: &str = "NETWORK_NAMESPACE";
pub const NETWORK_NAME_ENV: &str = "NETWORK_NAME";
pub const SOURCE_NODE_ENV: &str = "SOURCE_NODE";
pub const TARGET_NODE_ENV: &str = "TARGET_NODE";
pub const SAMPLE_DURATION_ENV: &str = "SAMPLE_DURATION";
pub const DESIRED_MAX_LATENCY_ENV: &str = "MAX_DESIRED_LATENCY";

pub const KUBERNETES_SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";
pub const KUBERNETES_SERVICE_PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env file if it exists.
    ///
    /// Variables already present in the process environment are not overridden.
    pub fn load_env_file(debug: bool) -> Result<()> {
        Self::load_env_file_from(Path::new(".env"), debug)
    }

    pub fn load_env_file_from(path: &Path, debug: bool) -> Result<()> {
        if path.exists() {
            dotenv::from_path(path)
                .map_err(|e| AppError::config(format!("Failed to load {}: {}", path.display(), e)))?;

            if debug {
                eprintln!("Loaded configuration from {}", path.display());
            }
        } else if debug {
            eprintln!("No {} file found, using environment and CLI arguments", path.display());
        }

        Ok(())
    }

    /// Create example .env file content
    pub fn create_example_env_content() -> String {
        r#"# VM Latency Checkup Configuration
#
# Values here are used when neither the environment nor the command line
# provides them.

# ConfigMap receiving the results (must already exist)
# RESULT_CONFIGMAP_NAMESPACE=kiagnose
# RESULT_CONFIGMAP_NAME=latency-results

# Namespace the probe VMs are created in (defaults to the pod namespace)
# POD_NAMESPACE=kiagnose

# NetworkAttachmentDefinition under test
# NETWORK_NAMESPACE=default
# NETWORK_NAME=blue-network

# Optional node pinning for the probe VMs
# SOURCE_NODE=worker-1
# TARGET_NODE=worker-2

# Sampling window and pass threshold
# SAMPLE_DURATION=30s
# MAX_DESIRED_LATENCY=5ms
"#
        .to_string()
    }

    /// Save example .env file to disk
    pub fn save_example_env_file(path: &Path) -> Result<()> {
        let content = Self::create_example_env_content();
        std::fs::write(path, content)
            .map_err(|e| AppError::config(format!("Failed to write example .env file: {}", e)))?;

        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        match key {
            SAMPLE_DURATION_ENV | DESIRED_MAX_LATENCY_ENV => {
                humantime::parse_duration(value.trim()).map_err(|e| {
                    AppError::config(format!("Invalid {} value '{}': {}", key, value, e))
                })?;
            }
            RESULT_CONFIGMAP_NAMESPACE_ENV
            | RESULT_CONFIGMAP_NAME_ENV
            | WORKING_NAMESPACE_ENV
            | NETWORK_NAMESPACE_ENV
            | NETWORK_NAME_ENV => {
                if value.trim().is_empty() {
                    return Err(AppError::config(format!("{} must not be empty", key)));
                }
            }
            _ => {
                // Unknown environment variable, ignore
            }
        }

        Ok(())
    }

    /// Get list of all supported environment variables with descriptions
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            (RESULT_CONFIGMAP_NAMESPACE_ENV, "Namespace of the result ConfigMap", "kiagnose"),
            (RESULT_CONFIGMAP_NAME_ENV, "Name of the result ConfigMap", "latency-results"),
            (WORKING_NAMESPACE_ENV, "Namespace the probe VMs run in", "kiagnose"),
            (NETWORK_NAMESPACE_ENV, "Namespace of the NetworkAttachmentDefinition", "default"),
            (NETWORK_NAME_ENV, "Name of the NetworkAttachmentDefinition", "blue-network"),
            (SOURCE_NODE_ENV, "Node for the source VM (optional)", "worker-1"),
            (TARGET_NODE_ENV, "Node for the target VM (optional)", "worker-2"),
            (SAMPLE_DURATION_ENV, "Latency sampling window", "30s"),
            (DESIRED_MAX_LATENCY_ENV, "Maximum max-latency that still passes", "5ms"),
        ]
    }

    /// Display environment variable help
    pub fn display_env_help() -> String {
        let mut help = String::new();
        help.push_str("Supported Environment Variables:\n\n");

        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<28} {}\n", var, description));
            help.push_str(&format!("  {:<28} Example: {}\n\n", "", example));
        }

        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");

        help
    }

    /// Validate all currently set environment variables
    pub fn validate_current_env() -> Vec<String> {
        Self::get_supported_env_vars()
            .into_iter()
            .filter_map(|(var_name, _, _)| {
                let value = std::env::var(var_name).ok()?;
                Self::validate_env_var(var_name, &value)
                    .err()
                    .map(|e| format!("Warning: {}", e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_env_manager_create_example_content() {
        let content = EnvManager::create_example_env_content();

        for (name, _, _) in EnvManager::get_supported_env_vars() {
            assert!(content.contains(&format!("{}=", name)), "missing {}", name);
        }
    }

    #[test]
    fn test_env_manager_save_example_file() {
        let temp_file = NamedTempFile::new().unwrap();
        EnvManager::save_example_env_file(temp_file.path()).unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(content.contains("VM Latency Checkup Configuration"));
    }

    #[test]
    fn test_env_manager_validate_env_var() {
        assert!(EnvManager::validate_env_var(SAMPLE_DURATION_ENV, "30s").is_ok());
        assert!(EnvManager::validate_env_var(DESIRED_MAX_LATENCY_ENV, "5ms").is_ok());
        assert!(EnvManager::validate_env_var(NETWORK_NAME_ENV, "blue-network").is_ok());
        assert!(EnvManager::validate_env_var("UNRELATED", "").is_ok());

        assert!(EnvManager::validate_env_var(SAMPLE_DURATION_ENV, "thirty").is_err());
        assert!(EnvManager::validate_env_var(DESIRED_MAX_LATENCY_ENV, "5").is_err());
        assert!(EnvManager::validate_env_var(NETWORK_NAME_ENV, "  ").is_err());
    }

    #[test]
    fn test_missing_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EnvManager::load_env_file_from(&dir.path().join(".env"), false).is_ok());
    }

    #[test]
    fn test_display_env_help() {
        let help = EnvManager::display_env_help();

        assert!(help.contains("Supported Environment Variables:"));
        assert!(help.contains("SAMPLE_DURATION"));
        assert!(help.contains("MAX_DESIRED_LATENCY"));
        assert!(help.contains("Configuration Priority"));
    }
}
