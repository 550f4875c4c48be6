//! Latency sampling with `ping`
//!
//! Builds the ping command typed into the source VM's console and turns the
//! round-trip summary it prints into a [`PingSample`].

use crate::console::ConsoleSession;
use crate::defaults::DEFAULT_PING_ARGS;
use crate::error::{AppError, Result};
use crate::logging::Logger;
use crate::models::{duration_str, PingSample};
use regex::Regex;
use std::net::IpAddr;
use std::time::Duration;

/// Matches `rtt min/avg/max/mdev = 0.251/0.412/0.733/0.102 ms` (Linux) and
/// `round-trip min/avg/max/stddev = ...` (BSD)
pub const SUMMARY_PATTERN: &str =
    r"(round-trip|rtt)\s+\S+\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)/([0-9.]+)\s*ms";

/// Whether a textual address is an IPv6 literal
pub fn is_ipv6(address: &str) -> bool {
    matches!(address.trim().parse::<IpAddr>(), Ok(IpAddr::V6(_)))
}

/// Compose the ping command line for `address`.
///
/// IPv6 literals select `ping -6`. Without `args` the command sends five
/// probes with a ten second deadline.
pub fn compose_ping_command(address: &str, args: &[&str]) -> String {
    let program = if is_ipv6(address) { "ping -6" } else { "ping" };
    let args = if args.is_empty() {
        DEFAULT_PING_ARGS.to_string()
    } else {
        args.join(" ")
    };
    format!("{} {} {}", program, address.trim(), args)
}

/// Ping command that samples for `duration`, rounded up to whole seconds
pub fn sampling_command(address: &str, duration: Duration) -> String {
    let mut seconds = duration.as_secs();
    if duration.subsec_nanos() > 0 || seconds == 0 {
        seconds += 1;
    }
    compose_ping_command(address, &[&format!("-w {}", seconds)])
}

/// Parser for ping round-trip summaries
#[derive(Debug, Clone)]
pub struct PingParser {
    summary: Regex,
}

impl PingParser {
    pub fn new() -> Result<Self> {
        let summary = Regex::new(SUMMARY_PATTERN)
            .map_err(|e| AppError::internal(format!("invalid ping summary pattern: {}", e)))?;
        Ok(Self { summary })
    }

    /// Extract the round-trip figures from ping output.
    ///
    /// When the output holds several summary lines the last one wins. Output
    /// without a summary, or with a figure that is not a valid non-negative
    /// number, is a parse error.
    pub fn parse(&self, output: &str) -> Result<PingSample> {
        let captures = self
            .summary
            .captures_iter(output)
            .last()
            .ok_or_else(|| AppError::parse(format!("no round-trip summary in ping output: {:?}", last_line(output))))?;

        let figure = |index: usize, name: &str| -> Result<Duration> {
            let text = captures.get(index).map(|m| m.as_str()).unwrap_or_default();
            let millis: f64 = text.trim().parse().map_err(|_| {
                AppError::parse(format!("invalid {} latency '{}' in ping summary", name, text))
            })?;
            if !millis.is_finite() || millis < 0.0 {
                return Err(AppError::parse(format!("invalid {} latency '{}' in ping summary", name, text)));
            }
            Ok(duration_str::from_millis_f64(millis))
        };

        Ok(PingSample::new(
            figure(2, "min")?,
            figure(3, "average")?,
            figure(4, "max")?,
            figure(5, "jitter")?,
        ))
    }
}

/// Parse ping output with a freshly compiled [`PingParser`]
pub fn parse_ping_output(output: &str) -> Result<PingSample> {
    PingParser::new()?.parse(output)
}

fn last_line(output: &str) -> &str {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default()
        .trim()
}

/// Runs ping from the source VM's console
pub struct LatencySampler<'a> {
    logger: &'a Logger,
    parser: PingParser,
}

impl<'a> LatencySampler<'a> {
    pub fn new(logger: &'a Logger) -> Result<Self> {
        Ok(Self {
            logger,
            parser: PingParser::new()?,
        })
    }

    /// Ping `target` for `duration` and parse the summary.
    ///
    /// The console wait is bounded by the sample duration plus `grace`, the
    /// time ping needs to print its statistics after its deadline.
    pub async fn sample(
        &self,
        session: &mut ConsoleSession,
        target: IpAddr,
        duration: Duration,
        grace: Duration,
    ) -> Result<PingSample> {
        let command = sampling_command(&target.to_string(), duration);

        self.logger
            .info("Sampling latency")
            .field("console", session.target())
            .field("command", &command)
            .field("duration", duration_str::format(duration))
            .log()
            .await;

        let console = session.target().to_string();
        let output = session
            .run_command(&command, duration + grace)
            .await
            .map_err(|e| match e {
                AppError::ConsoleTimeout(message) => AppError::console_timeout(format!(
                    "ping from {} to {} did not finish: {}",
                    console, target, message
                )),
                other => other,
            })?;

        if !output.success() {
            self.logger
                .warn("ping exited with a non-zero status")
                .field("console", &console)
                .field("status", output.status)
                .log()
                .await;
        }

        let sample = self.parser.parse(&output.output).map_err(|e| match e {
            AppError::Parse(message) => {
                AppError::parse(format!("{} (ping from {} to {})", message, console, target))
            }
            other => other,
        })?;

        self.logger.info("Latency sampled").sample(&sample).log().await;
        Ok(sample)
    }
}
