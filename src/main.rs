//! VM Latency Checkup - command-line entry point
//!
//! Loads configuration, runs the checkup against the cluster the process
//! runs in (or the one given on the command line), publishes the result and
//! exits with a code that names the failed stage.

use clap::Parser;
use std::path::Path;
use std::process;
use std::sync::Arc;
use vm_latency_checkup::{
    cli::Cli,
    cluster::{ControlPlane, KubeClient},
    config::{
        env::EnvManager,
        parser::{display_config_summary, load_config},
    },
    error::{AppError, Result},
    logging::Logger,
    output::ResultSummary,
    reporter::{ConfigMapReporter, ResultReporter, StdoutReporter},
    Checkup, PKG_NAME, VERSION,
};

#[tokio::main]
async fn main() {
    // The checkup catches panics in its measured section so the probe VMs
    // still get disposed; the hook only reports.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {}", panic_info);
    }));

    let debug_requested = std::env::args().any(|arg| arg == "--debug");
    if let Err(e) = EnvManager::load_env_file(debug_requested) {
        eprintln!("{}", e.format_for_console(false));
        process::exit(e.exit_code());
    }

    let cli = Cli::parse();
    if cli.env_help {
        print!("{}", EnvManager::display_env_help());
        return;
    }
    if let Some(path) = &cli.write_env_example {
        if let Err(e) = EnvManager::save_example_env_file(Path::new(path)) {
            eprintln!("{}", e.format_for_console(false));
            process::exit(e.exit_code());
        }
        println!("Example configuration written to {}", path);
        return;
    }

    let use_color = cli.use_colors();
    match run_application(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{}", e.format_for_console(use_color));
            process::exit(e.exit_code());
        }
    }
}

/// Run one checkup and return the process exit code
async fn run_application(cli: Cli) -> Result<i32> {
    let config = load_config(cli)?;
    let output = &config.output;

    for warning in &config.warnings {
        eprintln!("{}", warning.format(output.enable_color));
    }

    let logger = Logger::with_options(PKG_NAME, output);
    logger
        .set_session_id(uuid::Uuid::new_v4().simple().to_string())
        .await;

    if output.debug {
        eprintln!("{} v{}", PKG_NAME, VERSION);
        eprintln!(
            "Built {} from {}",
            option_env!("BUILD_TIME").unwrap_or("unknown"),
            option_env!("GIT_COMMIT").unwrap_or("unknown")
        );
        eprintln!("{}", display_config_summary(&config));
        for problem in EnvManager::validate_current_env() {
            eprintln!("{}", problem);
        }
        eprintln!();
    }

    let cluster: Arc<dyn ControlPlane> = Arc::new(KubeClient::from_access(&config.cluster)?);

    let checkup = Checkup::new(cluster.clone(), config.checkup.clone(), &logger);
    let result = checkup.run().await;

    let mut reporters: Vec<Box<dyn ResultReporter>> = vec![Box::new(ConfigMapReporter::new(cluster, &logger))];
    if output.stdout {
        reporters.push(Box::new(StdoutReporter));
    }

    let mut report_error: Option<AppError> = None;
    for reporter in &reporters {
        if let Err(error) = reporter.report(&result).await {
            logger
                .error("Failed to publish result")
                .field("reporter", reporter.name())
                .error_info(&error)
                .log()
                .await;
            report_error.get_or_insert(error);
        }
    }

    let summary = ResultSummary::new(&result, output.enable_color).render();
    if output.stdout {
        // stdout carries only the JSON result document
        eprintln!("{}", summary);
    } else {
        println!("{}", summary);
    }

    match report_error {
        Some(error) if result.succeeded() => Err(error),
        Some(error) => {
            eprintln!("{}", error.format_for_console(output.enable_color));
            Ok(result.exit_code())
        }
        None => Ok(result.exit_code()),
    }
}
