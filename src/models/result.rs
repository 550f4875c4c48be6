//! Latency sample and checkup result data models

use crate::error::AppError;
use crate::models::config::CheckupConfig;
use crate::models::duration_str;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const SUCCEEDED_KEY: &str = "status.succeeded";
pub const FAILURE_REASON_KEY: &str = "status.failureReason";
pub const MIN_LATENCY_KEY: &str = "status.result.minLatency";
pub const MAX_LATENCY_KEY: &str = "status.result.maxLatency";
pub const AVERAGE_LATENCY_KEY: &str = "status.result.averageLatency";
pub const JITTER_KEY: &str = "status.result.jitter";

/// Prefix for echoed input parameters
pub const SPEC_ENV_PREFIX: &str = "spec.env.";

/// Round-trip statistics from one ping summary line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PingSample {
    #[serde(with = "duration_str")]
    pub min: Duration,
    #[serde(with = "duration_str")]
    pub avg: Duration,
    #[serde(with = "duration_str")]
    pub max: Duration,
    /// Mean deviation as reported by ping (`mdev`)
    #[serde(with = "duration_str")]
    pub jitter: Duration,
}

impl PingSample {
    pub fn new(min: Duration, avg: Duration, max: Duration, jitter: Duration) -> Self {
        Self { min, avg, max, jitter }
    }
}

/// Outcome of comparing the sample against the threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Passed,
    ThresholdExceeded { message: String },
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

/// Terminal record of a checkup run
#[derive(Debug)]
pub struct CheckupResult {
    /// Snapshot of the inputs the run used
    pub config: CheckupConfig,

    /// Wall-clock time the run took, set when the run finishes
    pub elapsed: Option<Duration>,

    /// Latency figures, kept even when a later stage failed
    pub latency: Option<PingSample>,

    /// Threshold evaluation; absent when no sample was taken
    pub verdict: Option<Verdict>,

    /// First stage failure
    pub error: Option<AppError>,

    /// Teardown failure, reported next to `error` rather than in its place
    pub cleanup_error: Option<AppError>,
}

impl CheckupResult {
    pub fn new(config: CheckupConfig) -> Self {
        Self {
            config,
            elapsed: None,
            latency: None,
            verdict: None,
            error: None,
            cleanup_error: None,
        }
    }

    /// Record a stage failure; only the first one sticks
    pub fn fail(&mut self, error: AppError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && self.cleanup_error.is_none()
            && self.verdict.as_ref().is_some_and(Verdict::is_passed)
    }

    /// Human readable reason, empty when the run succeeded
    pub fn failure_reason(&self) -> String {
        let mut reasons = Vec::new();
        if let Some(error) = &self.error {
            reasons.push(error.to_string());
        }
        if let Some(Verdict::ThresholdExceeded { message }) = &self.verdict {
            reasons.push(message.clone());
        }
        if let Some(error) = &self.cleanup_error {
            reasons.push(error.to_string());
        }
        if reasons.is_empty() && self.verdict.is_none() {
            reasons.push("checkup finished without a latency sample".to_string());
        }
        reasons.join("; ")
    }

    /// Process exit code for this result
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            return 0;
        }
        if let Some(error) = self.error.as_ref().or(self.cleanup_error.as_ref()) {
            return error.exit_code();
        }
        match self.verdict {
            Some(Verdict::ThresholdExceeded { .. }) => 6,
            _ => 99,
        }
    }

    /// Flatten into the key-value map stored in the result ConfigMap
    pub fn to_data_map(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();

        for (name, value) in self.config.echoed_parameters() {
            data.insert(format!("{}{}", SPEC_ENV_PREFIX, name), value);
        }

        data.insert(SUCCEEDED_KEY.to_string(), self.succeeded().to_string());
        data.insert(FAILURE_REASON_KEY.to_string(), self.failure_reason());

        let figure = |pick: fn(&PingSample) -> Duration| {
            self.latency
                .as_ref()
                .map(|sample| duration_str::format(pick(sample)))
                .unwrap_or_default()
        };
        data.insert(MIN_LATENCY_KEY.to_string(), figure(|s| s.min));
        data.insert(MAX_LATENCY_KEY.to_string(), figure(|s| s.max));
        data.insert(AVERAGE_LATENCY_KEY.to_string(), figure(|s| s.avg));
        data.insert(JITTER_KEY.to_string(), figure(|s| s.jitter));

        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::models::config::sample_config;

    fn sample() -> PingSample {
        PingSample::new(
            Duration::from_micros(100),
            Duration::from_micros(200),
            Duration::from_micros(300),
            Duration::from_micros(50),
        )
    }

    #[test]
    fn test_passed_result_map() {
        let mut result = CheckupResult::new(sample_config());
        result.latency = Some(sample());
        result.verdict = Some(Verdict::Passed);

        let data = result.to_data_map();
        assert_eq!(data[SUCCEEDED_KEY], "true");
        assert_eq!(data[FAILURE_REASON_KEY], "");
        assert_eq!(data[MIN_LATENCY_KEY], "100us");
        assert_eq!(data[AVERAGE_LATENCY_KEY], "200us");
        assert_eq!(data[MAX_LATENCY_KEY], "300us");
        assert_eq!(data[JITTER_KEY], "50us");
        assert_eq!(data["spec.env.NETWORK_NAMESPACE"], "default");
        assert_eq!(data["spec.env.TARGET_NODE"], "worker-2");
        assert_eq!(data.len(), 12);
    }

    #[test]
    fn test_never_ran_result_has_empty_figures() {
        let mut result = CheckupResult::new(sample_config());
        result.fail(AppError::preflight("KubeVirt is not available").in_stage(Stage::Preflight));

        let data = result.to_data_map();
        assert_eq!(data[SUCCEEDED_KEY], "false");
        assert!(data[FAILURE_REASON_KEY].starts_with("preflight:"));
        assert_eq!(data[MAX_LATENCY_KEY], "");
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn test_only_first_failure_is_kept() {
        let mut result = CheckupResult::new(sample_config());
        result.fail(AppError::console_timeout("first"));
        result.fail(AppError::parse("second"));
        assert!(result.failure_reason().contains("first"));
        assert!(!result.failure_reason().contains("second"));
    }

    #[test]
    fn test_cleanup_error_is_reported_alongside() {
        let mut result = CheckupResult::new(sample_config());
        result.latency = Some(sample());
        result.fail(AppError::console_timeout("ping never finished"));
        result.cleanup_error = Some(AppError::disposal("VM still present"));

        let reason = result.failure_reason();
        assert!(reason.contains("ping never finished"));
        assert!(reason.contains("VM still present"));
        assert_eq!(result.exit_code(), 4);
        // Partial sample survives the failure
        assert_eq!(result.to_data_map()[MAX_LATENCY_KEY], "300us");
    }

    #[test]
    fn test_threshold_breach_is_a_failed_result() {
        let mut result = CheckupResult::new(sample_config());
        result.latency = Some(sample());
        result.verdict = Some(Verdict::ThresholdExceeded {
            message: "max latency 10ms exceeds 5ms".to_string(),
        });

        assert!(!result.succeeded());
        assert_eq!(result.exit_code(), 6);
        assert_eq!(result.failure_reason(), "max latency 10ms exceeds 5ms");
    }
}
