//! Checkup orchestration
//!
//! Runs the stages strictly in order:
//! preflight, network type, provisioning, console check, sampling,
//! evaluation, disposal. Every stage failure is tagged with its [`Stage`] and
//! recorded on the [`CheckupResult`]; nothing here returns early without a
//! result. Once the first probe VM exists, disposal runs on every path,
//! including a panic inside the measured section.

pub mod disposal;
pub mod evaluator;

pub use disposal::ProbeVmLease;
pub use evaluator::evaluate;

use crate::cluster::{ControlPlane, NetworkAttachmentDefinition};
use crate::console::ConsoleSession;
use crate::error::{AppError, Result, Stage};
use crate::logging::Logger;
use crate::models::{CheckupConfig, CheckupResult, ProbeRole};
use crate::network::{NetworkConfig, NetworkKind};
use crate::ping::LatencySampler;
use crate::preflight::PreflightValidator;
use crate::vm::{target_address, AttachmentStrategy, ProbeVmFactory, Provisioner};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// One checkup run against a control plane
pub struct Checkup {
    cluster: Arc<dyn ControlPlane>,
    config: CheckupConfig,
    logger: Logger,
    run_id: String,
}

impl Checkup {
    pub fn new(cluster: Arc<dyn ControlPlane>, config: CheckupConfig, logger: &Logger) -> Self {
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            cluster,
            config,
            logger: logger.child("checkup"),
            run_id,
        }
    }

    /// Use a fixed suffix for probe VM names
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn config(&self) -> &CheckupConfig {
        &self.config
    }

    /// Run the checkup to completion
    pub async fn run(&self) -> CheckupResult {
        let started = Instant::now();
        let mut result = CheckupResult::new(self.config.clone());
        self.logger.add_context_field("run_id", &self.run_id).await;

        self.logger
            .info("Starting checkup")
            .field("network", self.config.network_reference())
            .field("sample_duration", crate::models::duration_str::format(self.config.sample_duration))
            .log()
            .await;

        let nad = match self
            .staged(Stage::Preflight, PreflightValidator::new(&*self.cluster, &self.config, &self.logger).run())
            .await
        {
            Ok(nad) => nad,
            Err(error) => return self.finish(result, error, started).await,
        };

        let strategy = match self.staged(Stage::NetworkType, self.resolve_strategy(&nad)).await {
            Ok(strategy) => strategy,
            Err(error) => return self.finish(result, error, started).await,
        };

        let mut lease = ProbeVmLease::new(self.cluster.clone(), self.config.timeouts, &self.logger);
        let measured = AssertUnwindSafe(self.measure(strategy, &mut lease, &mut result))
            .catch_unwind()
            .await;
        match measured {
            Ok(Ok(())) => {}
            Ok(Err(error)) => result.fail(error),
            Err(panic) => result.fail(AppError::internal(format!(
                "checkup panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }

        if !lease.is_empty() {
            if let Err(error) = self.staged(Stage::Disposal, lease.dispose()).await {
                result.cleanup_error = Some(error);
            }
        }

        result.elapsed = Some(started.elapsed());
        self.log_outcome(&result).await;
        result
    }

    /// Pick the attachment strategy for the network under test
    async fn resolve_strategy(&self, nad: &NetworkAttachmentDefinition) -> Result<AttachmentStrategy> {
        let network = NetworkConfig::parse(&nad.spec.config)?;
        let kind = network.kind();

        self.logger
            .info("Resolved network type")
            .field("network", self.config.network_reference())
            .field("type", network.network_type())
            .field("kind", kind.to_string())
            .log()
            .await;

        if kind == NetworkKind::Unsupported {
            return Err(AppError::provisioning(format!(
                "network {} has unsupported type '{}'",
                self.config.network_reference(),
                network.network_type().unwrap_or_default()
            )));
        }
        AttachmentStrategy::for_kind(kind)
    }

    /// Provision, check consoles, sample and evaluate
    async fn measure(
        &self,
        strategy: AttachmentStrategy,
        lease: &mut ProbeVmLease,
        result: &mut CheckupResult,
    ) -> Result<()> {
        let factory = ProbeVmFactory::new(&self.config, strategy, self.run_id.clone());
        let provisioner = Provisioner::new(&*self.cluster, self.config.timeouts, &self.logger);
        let source = factory.probe_vm(ProbeRole::Source);
        let target = factory.probe_vm(ProbeRole::Target);

        let target_vmi = self
            .staged(Stage::Provisioning, async {
                for vm in [&source, &target] {
                    provisioner.launch(vm, &factory.manifest(vm)).await?;
                    lease.track(vm.clone());
                }
                provisioner.wait_ready(&source).await?;
                provisioner.wait_ready(&target).await
            })
            .await?;

        let mut session = self
            .staged(Stage::ConsoleCheck, async {
                let source_session = provisioner.check_console(&source).await?;
                let target_session = provisioner.check_console(&target).await?;
                close_quietly(target_session, &self.logger).await;
                Ok::<_, AppError>(source_session)
            })
            .await?;

        let address = target_address(&target_vmi, &target);
        let sampler = LatencySampler::new(&self.logger)?;
        let sampled = self
            .staged(
                Stage::Sampling,
                sampler.sample(
                    &mut session,
                    address,
                    self.config.sample_duration,
                    self.config.timeouts.sample_grace,
                ),
            )
            .await;
        close_quietly(session, &self.logger).await;
        let sample = sampled?;
        result.latency = Some(sample);

        let span = self.logger.start_stage(Stage::Evaluation).await;
        let verdict = evaluate(&sample, self.config.max_desired_latency);
        self.logger.end_stage(span, verdict.is_passed()).await;
        result.verdict = Some(verdict);
        Ok(())
    }

    /// Run one stage inside a logged span, tagging its error with the stage
    async fn staged<T, F>(&self, stage: Stage, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let span = self.logger.start_stage(stage).await;
        let outcome = work.await.map_err(|e| e.in_stage(stage));
        if let Err(error) = &outcome {
            self.logger.error("Stage failed").error_info(error).log().await;
        }
        self.logger.end_stage(span, outcome.is_ok()).await;
        outcome
    }

    async fn finish(&self, mut result: CheckupResult, error: AppError, started: Instant) -> CheckupResult {
        result.fail(error);
        result.elapsed = Some(started.elapsed());
        self.log_outcome(&result).await;
        result
    }

    async fn log_outcome(&self, result: &CheckupResult) {
        let entry = if result.succeeded() {
            self.logger.info("Checkup succeeded")
        } else {
            self.logger.warn("Checkup failed")
        };
        let entry = entry
            .field("elapsed", result.elapsed.map(crate::models::duration_str::format))
            .field("failure_reason", result.failure_reason());
        match &result.latency {
            Some(sample) => entry.sample(sample).log().await,
            None => entry.log().await,
        }
    }
}

async fn close_quietly(session: ConsoleSession, logger: &Logger) {
    let target = session.target().to_string();
    if let Err(error) = session.close().await {
        logger
            .debug("Failed to close console")
            .field("console", target)
            .field("error", error.to_string())
            .log()
            .await;
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
