//! Configuration validation utilities and rules

use crate::{
    error::{AppError, Result},
    models::CheckupConfig,
    config::env::*,
};
use std::time::Duration;

const MIN_SAMPLE_DURATION: Duration = Duration::from_secs(1);
const MAX_SAMPLE_DURATION: Duration = Duration::from_secs(3600);
const SHORT_SAMPLE_DURATION: Duration = Duration::from_secs(5);
const LOOSE_LATENCY_THRESHOLD: Duration = Duration::from_secs(1);

/// Configuration validator with advanced validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Reject unusable configurations and collect non-fatal warnings
    pub fn validate_comprehensive(config: &CheckupConfig) -> Result<Vec<ValidationWarning>> {
        let mut warnings = Vec::new();

        Self::validate_names(config)?;
        Self::validate_addressing(config)?;
        warnings.extend(Self::validate_durations(config)?);
        warnings.extend(Self::validate_placement(config));

        Ok(warnings)
    }

    fn validate_names(config: &CheckupConfig) -> Result<()> {
        let labels = [
            (RESULT_CONFIGMAP_NAMESPACE_ENV, &config.result_config_map_namespace),
            (WORKING_NAMESPACE_ENV, &config.working_namespace),
            (NETWORK_NAMESPACE_ENV, &config.network_namespace),
        ];
        for (name, value) in labels {
            if !is_dns1123_label(value) {
                return Err(AppError::config(format!(
                    "{} '{}' is not a valid namespace name",
                    name, value
                )));
            }
        }

        let subdomains = [
            (RESULT_CONFIGMAP_NAME_ENV, &config.result_config_map_name),
            (NETWORK_NAME_ENV, &config.network_name),
        ];
        for (name, value) in subdomains {
            if !is_dns1123_subdomain(value) {
                return Err(AppError::config(format!(
                    "{} '{}' is not a valid object name",
                    name, value
                )));
            }
        }

        Ok(())
    }

    fn validate_addressing(config: &CheckupConfig) -> Result<()> {
        let source = &config.addressing.source;
        let target = &config.addressing.target;

        if source.mac == target.mac {
            return Err(AppError::config(format!(
                "source and target VMs must use distinct MAC addresses, both are {}",
                source.mac_string()
            )));
        }
        if source.ip() == target.ip() {
            return Err(AppError::config(format!(
                "source and target VMs must use distinct addresses, both are {}",
                source.ip()
            )));
        }
        if source.ip().is_ipv4() != target.ip().is_ipv4() {
            return Err(AppError::config(
                "source and target VMs must use the same IP family",
            ));
        }

        Ok(())
    }

    fn validate_durations(config: &CheckupConfig) -> Result<Vec<ValidationWarning>> {
        let mut warnings = Vec::new();

        if config.sample_duration < MIN_SAMPLE_DURATION || config.sample_duration > MAX_SAMPLE_DURATION {
            return Err(AppError::config(format!(
                "{} must be between 1s and 1h, got {}",
                SAMPLE_DURATION_ENV,
                humantime::format_duration(config.sample_duration)
            )));
        }
        if config.max_desired_latency.is_zero() {
            return Err(AppError::config(format!(
                "{} must be greater than zero",
                DESIRED_MAX_LATENCY_ENV
            )));
        }

        if config.sample_duration < SHORT_SAMPLE_DURATION {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Sample duration of {} may not provide a reliable latency figure (recommended: >= 5s)",
                    humantime::format_duration(config.sample_duration)
                ),
            ));
        }
        if config.max_desired_latency > LOOSE_LATENCY_THRESHOLD {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!(
                    "Latency threshold of {} is unusually loose for a layer 2 network",
                    humantime::format_duration(config.max_desired_latency)
                ),
            ));
        }

        Ok(warnings)
    }

    fn validate_placement(config: &CheckupConfig) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if !config.source_node.is_empty() && config.source_node == config.target_node {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Source and target VMs are both pinned to {}; traffic will not leave the node",
                    config.source_node
                ),
            ));
        }
        if config.source_node.is_empty() != config.target_node.is_empty() {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                "Only one probe VM is pinned to a node; the other may land anywhere".to_string(),
            ));
        }

        warnings
    }
}

fn is_dns1123_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn is_dns1123_subdomain(value: &str) -> bool {
    value.len() <= 253 && !value.is_empty() && value.split('.').all(is_dns1123_label)
}

/// Validation warning levels
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationLevel {
    Info,
    Warning,
    Error,
}

impl ValidationLevel {
    /// Get display string for level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Configuration validation warning
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub level: ValidationLevel,
    pub message: String,
}

impl ValidationWarning {
    /// Create a new validation warning
    pub fn new(level: ValidationLevel, message: String) -> Self {
        Self { level, message }
    }

    /// Format warning for display
    pub fn format(&self, use_color: bool) -> String {
        if use_color {
            use colored::Colorize;
            let level = match self.level {
                ValidationLevel::Info => self.level.as_str().blue(),
                ValidationLevel::Warning => self.level.as_str().yellow(),
                ValidationLevel::Error => self.level.as_str().red(),
            };
            format!("[{}] {}", level, self.message)
        } else {
            format!("[{}] {}", self.level.as_str(), self.message)
        }
    }
}

/// Convenience function for comprehensive configuration validation
pub fn validate_config(config: &CheckupConfig) -> Result<Vec<ValidationWarning>> {
    ConfigValidator::validate_comprehensive(config)
}
