//! Additional comprehensive tests for configuration parsing and validation

use super::{ConfigParser, ConfigValidator};
use crate::{cli::Cli, models::config::sample_config};
use clap::Parser;
use proptest::prelude::*;

fn argv(extra: &[&str]) -> Vec<String> {
    let mut args: Vec<String> = [
        "vm-latency-checkup",
        "--result-configmap-namespace",
        "kiagnose",
        "--result-configmap-name",
        "latency-results",
        "--working-namespace",
        "kiagnose",
        "--network-namespace",
        "default",
        "--network-name",
        "blue-net",
        "--sample-duration",
        "10s",
        "--max-desired-latency",
        "5ms",
        "--api-server",
        "https://10.0.0.1:6443",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();
    // A flag already in the base list has its value replaced; clap rejects repeats.
    let mut rest = extra.iter();
    while let Some(arg) = rest.next() {
        match args.iter().position(|existing| existing == arg) {
            Some(position) => {
                if let Some(value) = rest.next() {
                    args[position + 1] = value.to_string();
                }
            }
            None => args.push(arg.to_string()),
        }
    }
    args
}

fn parse_args(extra: &[&str]) -> crate::error::Result<super::AppConfig> {
    let cli = Cli::try_parse_from(argv(extra)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    ConfigParser::new(cli).with_service_account_dir(dir.path()).parse()
}

/// Edge cases reached through real command lines
mod cli_parsing_tests {
    use super::*;

    #[test]
    fn test_human_durations_from_flags() {
        let config = parse_args(&["--sample-duration", "1m 30s"]).unwrap();
        assert_eq!(config.checkup.sample_duration, std::time::Duration::from_secs(90));
    }

    #[test]
    fn test_flag_value_overrides_base() {
        let config = parse_args(&["--network-name", "red-net"]).unwrap();
        assert_eq!(config.checkup.network_name, "red-net");
    }

    #[test]
    fn test_repeated_flag_is_rejected() {
        let mut args = argv(&[]);
        args.extend(["--network-name".to_string(), "red-net".to_string()]);
        let error = Cli::try_parse_from(args).unwrap_err();
        assert_eq!(error.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_stdout_and_color_flags() {
        let config = parse_args(&["--stdout", "--no-color"]).unwrap();
        assert!(config.output.stdout);
        assert!(!config.output.enable_color);
    }

    #[test]
    fn test_duplicate_addresses_rejected() {
        let error = parse_args(&["--target-cidr", "192.168.0.100/24"]).unwrap_err();
        assert_eq!(error.exit_code(), 1);
        assert!(error.to_string().contains("distinct addresses"));
    }

    #[test]
    fn test_mixed_ip_families_rejected() {
        let error = parse_args(&["--target-cidr", "fd00::200/64"]).unwrap_err();
        assert!(error.to_string().contains("same IP family"));
    }

    #[test]
    fn test_invalid_api_server() {
        let error = parse_args(&["--api-server", "not a url"]).unwrap_err();
        assert_eq!(error.category(), "CONFIG");
    }
}

/// Property tests over the validation rules
mod validation_property_tests {
    use super::*;

    proptest! {
        #[test]
        fn valid_namespace_names_pass(name in "[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?") {
            let mut config = sample_config();
            config.network_namespace = name;
            prop_assert!(ConfigValidator::validate_comprehensive(&config).is_ok());
        }

        #[test]
        fn uppercase_names_fail(name in "[a-z]{0,10}[A-Z][a-zA-Z]{0,10}") {
            let mut config = sample_config();
            config.network_name = name;
            prop_assert!(ConfigValidator::validate_comprehensive(&config).is_err());
        }

        #[test]
        fn sample_duration_bounds(secs in 0u64..7200) {
            let mut config = sample_config();
            config.sample_duration = std::time::Duration::from_secs(secs);
            let accepted = ConfigValidator::validate_comprehensive(&config).is_ok();
            prop_assert_eq!(accepted, (1..=3600).contains(&secs));
        }
    }
}
