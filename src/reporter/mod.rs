//! Publishing checkup results
//!
//! A result is flattened into string keys (see
//! [`CheckupResult::to_data_map`]) and handed to one or more reporters.

use crate::cluster::ControlPlane;
use crate::error::{AppError, Result, Stage};
use crate::logging::Logger;
use crate::models::CheckupResult;
use async_trait::async_trait;
use std::sync::Arc;

/// A destination for checkup results
#[async_trait]
pub trait ResultReporter: Send + Sync {
    async fn report(&self, result: &CheckupResult) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Merges the result into the ConfigMap named by the checkup configuration.
///
/// Keys the checkup owns are overwritten; other keys are left alone. The
/// update carries no resourceVersion, so the last writer wins.
pub struct ConfigMapReporter {
    cluster: Arc<dyn ControlPlane>,
    logger: Logger,
}

impl ConfigMapReporter {
    pub fn new(cluster: Arc<dyn ControlPlane>, logger: &Logger) -> Self {
        Self {
            cluster,
            logger: logger.child("reporter"),
        }
    }
}

#[async_trait]
impl ResultReporter for ConfigMapReporter {
    async fn report(&self, result: &CheckupResult) -> Result<()> {
        let namespace = &result.config.result_config_map_namespace;
        let name = &result.config.result_config_map_name;
        let failed = |action: &str, e: crate::cluster::ClusterError| {
            AppError::report(format!("failed to {} ConfigMap {}/{}: {}", action, namespace, name, e))
                .in_stage(Stage::Report)
        };

        let mut config_map = self
            .cluster
            .get_config_map(namespace, name)
            .await
            .map_err(|e| failed("read", e))?;

        let data = result.to_data_map();
        let keys = data.len();
        config_map.data.extend(data);

        self.cluster
            .update_config_map(&config_map)
            .await
            .map_err(|e| failed("update", e))?;

        self.logger
            .info("Result written")
            .field("config_map", format!("{}/{}", namespace, name))
            .field("keys", keys)
            .log()
            .await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "configmap"
    }
}

/// Prints the flattened result as pretty JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

impl StdoutReporter {
    pub fn render(result: &CheckupResult) -> Result<String> {
        serde_json::to_string_pretty(&result.to_data_map())
            .map_err(|e| AppError::report(format!("failed to render result: {}", e)).in_stage(Stage::Report))
    }
}

#[async_trait]
impl ResultReporter for StdoutReporter {
    async fn report(&self, result: &CheckupResult) -> Result<()> {
        println!("{}", Self::render(result)?);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ConfigMap, FakeCluster};
    use crate::models::config::sample_config;
    use crate::models::result::{FAILURE_REASON_KEY, SUCCEEDED_KEY};
    use crate::models::{PingSample, Verdict};
    use std::time::Duration;

    fn passed() -> CheckupResult {
        let mut result = CheckupResult::new(sample_config());
        result.latency = Some(PingSample::new(
            Duration::from_micros(251),
            Duration::from_micros(412),
            Duration::from_micros(733),
            Duration::from_micros(102),
        ));
        result.verdict = Some(Verdict::Passed);
        result
    }

    #[tokio::test]
    async fn test_merges_into_existing_config_map() {
        let cluster = FakeCluster::new().with_config_map("kiagnose", "latency-results");
        let mut existing = ConfigMap::new("kiagnose", "latency-results");
        existing.data.insert("owner".to_string(), "operator".to_string());
        existing.data.insert(SUCCEEDED_KEY.to_string(), "stale".to_string());
        cluster.update_config_map(&existing).await.unwrap();

        let reporter = ConfigMapReporter::new(Arc::new(cluster.clone()), &Logger::quiet("test"));
        reporter.report(&passed()).await.unwrap();

        let stored = cluster.config_map("kiagnose", "latency-results").unwrap();
        assert_eq!(stored.data["owner"], "operator");
        assert_eq!(stored.data[SUCCEEDED_KEY], "true");
        assert_eq!(stored.data[FAILURE_REASON_KEY], "");
        assert_eq!(stored.data["status.result.maxLatency"], "733us");
        assert_eq!(stored.data.len(), 13);
    }

    #[tokio::test]
    async fn test_update_failure_is_a_report_error() {
        let cluster = FakeCluster::new()
            .with_config_map("kiagnose", "latency-results")
            .failing_config_map_updates();
        let reporter = ConfigMapReporter::new(Arc::new(cluster), &Logger::quiet("test"));

        let error = reporter.report(&passed()).await.unwrap_err();
        assert_eq!(error.stage(), Some(Stage::Report));
        assert_eq!(error.exit_code(), 8);
        assert!(error.to_string().contains("failed to update ConfigMap kiagnose/latency-results"));
    }

    #[tokio::test]
    async fn test_missing_config_map() {
        let reporter = ConfigMapReporter::new(Arc::new(FakeCluster::new()), &Logger::quiet("test"));
        let error = reporter.report(&passed()).await.unwrap_err();
        assert!(error.to_string().contains("failed to read"));
    }

    #[test]
    fn test_stdout_render() {
        let rendered = StdoutReporter::render(&passed()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["status.succeeded"], "true");
        assert_eq!(parsed["spec.env.SAMPLE_DURATION"], "10s");
    }
}
