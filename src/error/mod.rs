//! Error handling for the VM latency checkup

use std::fmt;
use thiserror::Error;

/// Checkup stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Preflight,
    NetworkType,
    Provisioning,
    ConsoleCheck,
    Sampling,
    Evaluation,
    Disposal,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Preflight => "preflight",
            Stage::NetworkType => "network type",
            Stage::Provisioning => "provisioning",
            Stage::ConsoleCheck => "console check",
            Stage::Sampling => "sampling",
            Stage::Evaluation => "evaluation",
            Stage::Disposal => "disposal",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom error types for the VM latency checkup
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed checkup parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// Environment not ready (result sink, KubeVirt, network definition)
    #[error("Preflight error: {0}")]
    Preflight(String),

    /// Probe VM spec build or launch failures
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Probe VMs did not become ready in time
    #[error("Readiness timeout: {0}")]
    ReadinessTimeout(String),

    /// Expected console output never arrived
    #[error("Console timeout: {0}")]
    ConsoleTimeout(String),

    /// Console channel could not be opened or broke
    #[error("Console connection error: {0}")]
    ConsoleConnection(String),

    /// A console command ran but exited unsuccessfully
    #[error("Console command error: {0}")]
    ConsoleCommand(String),

    /// Malformed network configuration or latency text
    #[error("Parsing error: {0}")]
    Parse(String),

    /// Probe VM teardown failures
    #[error("Disposal error: {0}")]
    Disposal(String),

    /// Control plane API failures
    #[error("Cluster API error: {0}")]
    Cluster(String),

    /// Result sink write failures
    #[error("Report error: {0}")]
    Report(String),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Any of the above, tagged with the checkup stage it came from
    #[error("{stage}: {source}")]
    Staged {
        stage: Stage,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub fn preflight<S: Into<String>>(message: S) -> Self {
        Self::Preflight(message.into())
    }

    pub fn provisioning<S: Into<String>>(message: S) -> Self {
        Self::Provisioning(message.into())
    }

    pub fn readiness_timeout<S: Into<String>>(message: S) -> Self {
        Self::ReadinessTimeout(message.into())
    }

    pub fn console_timeout<S: Into<String>>(message: S) -> Self {
        Self::ConsoleTimeout(message.into())
    }

    pub fn console_connection<S: Into<String>>(message: S) -> Self {
        Self::ConsoleConnection(message.into())
    }

    pub fn console_command<S: Into<String>>(message: S) -> Self {
        Self::ConsoleCommand(message.into())
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    pub fn disposal<S: Into<String>>(message: S) -> Self {
        Self::Disposal(message.into())
    }

    pub fn cluster<S: Into<String>>(message: S) -> Self {
        Self::Cluster(message.into())
    }

    pub fn report<S: Into<String>>(message: S) -> Self {
        Self::Report(message.into())
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Tag this error with the stage it originated from.
    ///
    /// Already staged errors keep their original stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            staged @ Self::Staged { .. } => staged,
            other => Self::Staged {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was tagged with, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Staged { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost, untagged error
    pub fn root(&self) -> &AppError {
        match self {
            Self::Staged { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self.root() {
            Self::Config(_) => "CONFIG",
            Self::Preflight(_) => "PREFLIGHT",
            Self::Provisioning(_) => "PROVISIONING",
            Self::ReadinessTimeout(_) => "READINESS",
            Self::ConsoleTimeout(_) => "CONSOLE_TIMEOUT",
            Self::ConsoleConnection(_) => "CONSOLE",
            Self::ConsoleCommand(_) => "CONSOLE_COMMAND",
            Self::Parse(_) => "PARSE",
            Self::Disposal(_) => "DISPOSAL",
            Self::Cluster(_) => "CLUSTER",
            Self::Report(_) => "REPORT",
            Self::Io(_) => "IO",
            Self::Internal(_) | Self::Staged { .. } => "INTERNAL",
        }
    }

    /// Whether this error is any kind of bounded-wait expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::ReadinessTimeout(_) | Self::ConsoleTimeout(_))
    }

    /// Get exit code for this error type
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            Self::Config(_) | Self::Io(_) => 1,
            Self::Preflight(_) => 2,
            Self::Provisioning(_) | Self::ReadinessTimeout(_) => 3,
            Self::ConsoleTimeout(_) | Self::ConsoleConnection(_) | Self::ConsoleCommand(_) => 4,
            Self::Parse(_) => 5,
            Self::Disposal(_) => 7,
            Self::Report(_) => 8,
            Self::Cluster(_) => match self.stage() {
                Some(Stage::Preflight) => 2,
                Some(Stage::NetworkType) | Some(Stage::Provisioning) => 3,
                Some(Stage::Disposal) => 7,
                Some(Stage::Report) => 8,
                _ => 99,
            },
            Self::Internal(_) | Self::Staged { .. } => 99,
        }
    }

    /// Format error for console display with color coding
    pub fn format_for_console(&self, use_color: bool) -> String {
        let category = self.category();
        let message = self.to_string();

        if use_color {
            use colored::Colorize;
            match self.root() {
                Self::Config(_) | Self::Parse(_) => {
                    format!("[{}] {}", category.red().bold(), message.red())
                }
                Self::ReadinessTimeout(_) | Self::ConsoleTimeout(_) => {
                    format!("[{}] {}", category.blue().bold(), message.blue())
                }
                Self::Preflight(_) | Self::Cluster(_) => {
                    format!("[{}] {}", category.yellow().bold(), message.yellow())
                }
                Self::Internal(_) => {
                    format!("[{}] {}", category.bright_red().bold(), message.bright_red())
                }
                _ => format!("[{}] {}", category.cyan().bold(), message.cyan()),
            }
        } else {
            format!("[{}] {}", category, message)
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(error: url::ParseError) -> Self {
        Self::config(format!("URL parse error: {}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {}", error))
    }
}

impl From<humantime::DurationError> for AppError {
    fn from(error: humantime::DurationError) -> Self {
        Self::config(format!("Duration parse error: {}", error))
    }
}

impl From<dotenv::Error> for AppError {
    fn from(error: dotenv::Error) -> Self {
        Self::config(format!("Environment file error: {}", error))
    }
}

impl From<crate::cluster::ClusterError> for AppError {
    fn from(error: crate::cluster::ClusterError) -> Self {
        Self::cluster(error.to_string())
    }
}

/// Custom Result type for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Extension for tagging fallible results with a checkup stage
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T, E> StageContext<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.into().in_stage(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::config("SAMPLE_DURATION is missing");
        let display = error.to_string();
        assert!(display.contains("Configuration error"));
        assert!(display.contains("SAMPLE_DURATION is missing"));
    }

    #[test]
    fn test_staged_error_is_prefixed() {
        let error = AppError::preflight("ConfigMap default/results not found").in_stage(Stage::Preflight);
        assert_eq!(error.stage(), Some(Stage::Preflight));
        assert!(error.to_string().starts_with("preflight: Preflight error:"));
        assert_eq!(error.category(), "PREFLIGHT");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_restaging_keeps_original_stage() {
        let error = AppError::console_timeout("no prompt")
            .in_stage(Stage::ConsoleCheck)
            .in_stage(Stage::Provisioning);
        assert_eq!(error.stage(), Some(Stage::ConsoleCheck));
    }

    #[test]
    fn test_timeouts_are_distinguishable() {
        assert!(AppError::console_timeout("x").is_timeout());
        assert!(AppError::readiness_timeout("x").is_timeout());
        assert!(!AppError::console_connection("x").is_timeout());
        assert!(AppError::console_timeout("x").in_stage(Stage::Sampling).is_timeout());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppError::config("test").exit_code(), 1);
        assert_eq!(AppError::preflight("test").exit_code(), 2);
        assert_eq!(AppError::readiness_timeout("test").exit_code(), 3);
        assert_eq!(AppError::console_connection("test").exit_code(), 4);
        assert_eq!(AppError::parse("test").exit_code(), 5);
        assert_eq!(AppError::disposal("test").exit_code(), 7);
        assert_eq!(AppError::report("test").exit_code(), 8);
        assert_eq!(AppError::internal("test").exit_code(), 99);
        assert_eq!(AppError::cluster("test").in_stage(Stage::Preflight).exit_code(), 2);
    }

    #[test]
    fn test_stage_context_trait() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "token file missing",
        ));
        let error = result.stage(Stage::Config).unwrap_err();
        assert_eq!(error.stage(), Some(Stage::Config));
        assert_eq!(error.category(), "IO");
        assert!(error.to_string().contains("token file missing"));
    }

    #[test]
    fn test_console_formatting() {
        let error = AppError::config("Test error");
        let plain = error.format_for_console(false);
        let colored = error.format_for_console(true);

        assert!(plain.contains("[CONFIG]"));
        assert!(colored.contains("CONFIG"));
        assert!(plain.contains("Test error"));
    }

    #[test]
    fn test_duration_parse_error_conversion() {
        let err = humantime::parse_duration("ten seconds").unwrap_err();
        let app_error: AppError = err.into();
        assert_eq!(app_error.category(), "CONFIG");
        assert!(app_error.to_string().contains("Duration parse error"));
    }

    #[test]
    fn test_json_parse_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let app_error: AppError = json_error.into();
        assert_eq!(app_error.category(), "PARSE");
    }
}
