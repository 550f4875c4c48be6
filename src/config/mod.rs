//! Configuration management module

pub mod env;
pub mod parser;
pub mod validation;

// Re-export main functionality
pub use env::EnvManager;
pub use parser::{display_config_summary, load_config, AppConfig, ClusterAccess, ConfigParser, OutputOptions};
pub use validation::{validate_config, ConfigValidator, ValidationLevel, ValidationWarning};

#[cfg(test)]
mod comprehensive_tests;
