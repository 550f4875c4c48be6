//! Environment checks run before anything is allocated
//!
//! The checks only read from the cluster. They run in a fixed order and stop
//! at the first failure.

use crate::cluster::{ControlPlane, NetworkAttachmentDefinition};
use crate::error::{AppError, Result, Stage};
use crate::logging::Logger;
use crate::models::CheckupConfig;

pub struct PreflightValidator<'a> {
    cluster: &'a dyn ControlPlane,
    config: &'a CheckupConfig,
    logger: Logger,
}

impl<'a> PreflightValidator<'a> {
    pub fn new(cluster: &'a dyn ControlPlane, config: &'a CheckupConfig, logger: &Logger) -> Self {
        Self {
            cluster,
            config,
            logger: logger.child("preflight"),
        }
    }

    /// Run every check; returns the network definition under test
    pub async fn run(&self) -> Result<NetworkAttachmentDefinition> {
        self.verify_result_config_map().await?;
        self.verify_kubevirt_available().await?;
        self.verify_network_exists().await
    }

    pub async fn verify_result_config_map(&self) -> Result<()> {
        let namespace = &self.config.result_config_map_namespace;
        let name = &self.config.result_config_map_name;

        self.logger
            .debug("Verifying result ConfigMap exists")
            .field("config_map", format!("{}/{}", namespace, name))
            .log()
            .await;

        self.cluster
            .get_config_map(namespace, name)
            .await
            .map_err(|e| failed(format!("result ConfigMap {}/{} is not usable: {}", namespace, name, e)))?;
        Ok(())
    }

    /// Exactly one KubeVirt installation, reporting Available
    pub async fn verify_kubevirt_available(&self) -> Result<()> {
        self.logger.debug("Verifying KubeVirt is deployed and available").log().await;

        let kubevirts = self
            .cluster
            .list_kubevirts()
            .await
            .map_err(|e| failed(format!("failed to list KubeVirt installations: {}", e)))?;

        let kubevirt = match kubevirts.as_slice() {
            [] => return Err(failed("could not detect a KubeVirt installation")),
            [only] => only,
            many => {
                return Err(failed(format!(
                    "invalid KubeVirt installation, {} KubeVirt resources found",
                    many.len()
                )))
            }
        };

        if !kubevirt.is_available() {
            return Err(failed(format!(
                "KubeVirt {} is not available (phase: {})",
                kubevirt.metadata.name,
                kubevirt
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .unwrap_or("Unknown")
            )));
        }
        Ok(())
    }

    pub async fn verify_network_exists(&self) -> Result<NetworkAttachmentDefinition> {
        let reference = self.config.network_reference();
        self.logger
            .debug("Verifying NetworkAttachmentDefinition exists")
            .field("network", &reference)
            .log()
            .await;

        self.cluster
            .get_network_attachment_definition(&self.config.network_namespace, &self.config.network_name)
            .await
            .map_err(|e| failed(format!("NetworkAttachmentDefinition {} is not usable: {}", reference, e)))
    }
}

fn failed(message: impl Into<String>) -> AppError {
    AppError::preflight(message).in_stage(Stage::Preflight)
}
