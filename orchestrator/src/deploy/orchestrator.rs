//! Deployment orchestrator
//!
//! Owns the deployment state machine. Pipeline runs are strictly sequential:
//! the store reflects step N and its progress event is out before step N+1
//! starts. A failed step marks the deployment failed and stops the run, no
//! rollback is attempted. Cancellation is the one exception, it releases
//! whatever the run already created.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
use crate::deploy::pipeline::{step_percentage, Pipeline, PipelineContext, StepKind, StepOutput};
use crate::deploy::policy::{self, FailurePolicy, TeardownWarning};
use crate::deploy::readiness::PollOptions;
use crate::errors::StackError;
use crate::events::{ProgressEvent, ProgressPublisher};
use crate::gateways::{compute_name, Gateways};
use crate::models::deployment::{
    Deployment, DeploymentIntent, DeploymentStep, Infrastructure, InfrastructureConfig,
};
use crate::models::resource::{HealthReport, ProvisionedResource, ServiceHealth, ServiceKind};
use crate::store::DeploymentStore;

/// Orchestrator options
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    /// Upper bound of a single health probe
    pub health_probe_timeout: Duration,

    /// Compute readiness budget
    pub compute_poll: PollOptions,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            health_probe_timeout: Duration::from_secs(10),
            compute_poll: PollOptions::compute(),
        }
    }
}

/// Outcome of a stop request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopReport {
    pub deployment: Deployment,
    pub warnings: Vec<TeardownWarning>,
}

/// Deployment record with its step log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSnapshot {
    pub deployment: Deployment,
    pub steps: Vec<DeploymentStep>,
}

const CONTAINER_SERVICES: [ServiceKind; 4] = [
    ServiceKind::ModelServer,
    ServiceKind::VectorStore,
    ServiceKind::RetrievalPipeline,
    ServiceKind::ChatUi,
];

/// Drives deployments through their lifecycle
pub struct Orchestrator {
    store: Arc<dyn DeploymentStore>,
    publisher: Arc<dyn ProgressPublisher>,
    gateways: Gateways,
    pipeline: Pipeline,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        publisher: Arc<dyn ProgressPublisher>,
        gateways: Gateways,
        options: OrchestratorOptions,
    ) -> Self {
        let pipeline = Pipeline::standard(&gateways, options.compute_poll);
        Self {
            store,
            publisher,
            gateways,
            pipeline,
            options,
        }
    }

    /// Replace the step table
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Record a new pending deployment
    pub async fn submit(
        &self,
        organization_id: &str,
        intent: DeploymentIntent,
    ) -> Result<Deployment, StackError> {
        if organization_id.trim().is_empty() {
            return Err(StackError::ValidationError(
                "organization_id must not be empty".to_string(),
            ));
        }
        if intent.region.trim().is_empty() {
            return Err(StackError::ValidationError("region must not be empty".to_string()));
        }

        let deployment = Deployment::new(organization_id, intent);
        self.store.create(&deployment).await?;
        info!(
            "Deployment {} submitted ({} in {}, {})",
            deployment.id,
            deployment.intent.model_size,
            deployment.intent.region,
            deployment.intent.compliance
        );
        self.publisher.publish(&ProgressEvent::StatusChanged {
            deployment_id: deployment.id.clone(),
            status: deployment.status,
        });
        Ok(deployment)
    }

    pub async fn list(&self) -> Result<Vec<Deployment>, StackError> {
        self.store.list().await
    }

    /// Deployment record plus its step log
    pub async fn get_status(&self, id: &str) -> Result<DeploymentSnapshot, StackError> {
        let deployment = self.store.get(id).await?;
        let steps = self.store.steps(id).await?;
        Ok(DeploymentSnapshot { deployment, steps })
    }

    /// Run the provisioning pipeline to completion
    pub async fn run_pipeline(&self, id: &str) -> Result<Deployment, StackError> {
        self.run_pipeline_until(id, std::future::pending::<()>()).await
    }

    /// Run the provisioning pipeline, aborting when `cancel` resolves
    pub async fn run_pipeline_until<C>(&self, id: &str, cancel: C) -> Result<Deployment, StackError>
    where
        C: Future<Output = ()> + Send,
    {
        let deployment = self.store.get(id).await?;
        let mut fsm = DeploymentFsm::from_status(deployment.status);
        fsm.process(DeploymentEvent::Provision)
            .map_err(StackError::InvalidTransition)?;

        let deployment = self.set_status(id, fsm.status(), None).await?;
        let mut ctx = PipelineContext::new(deployment);
        if let Err(e) = self.store.update_infrastructure(id, ctx.infrastructure()).await {
            return Err(self
                .fail_run(&mut fsm, &ctx, StepKind::ProvisionCompute, e)
                .await);
        }

        tokio::pin!(cancel);
        let total = self.pipeline.len() as u8;
        let mut warnings = Vec::new();

        for (index, step) in self.pipeline.steps().iter().enumerate() {
            let number = index as u8 + 1;
            info!("[{}] step {}/{}: {}", id, number, total, step.kind.description());

            let outcome = tokio::select! {
                biased;
                _ = &mut cancel => Err(StackError::Cancelled),
                result = policy::execute(
                    step.policy,
                    step.kind.description(),
                    step.executor.execute(&ctx),
                    &mut warnings,
                ) => result,
            };

            let recorded = match outcome {
                Ok(Some(output)) => {
                    self.record_step(&mut ctx, step.kind, output, number, total)
                        .await
                }
                Ok(None) => {
                    warn!("[{}] step {} skipped after a non-fatal failure", id, number);
                    self.append_step(&ctx, step.kind, number, total).await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = recorded {
                return Err(self.fail_run(&mut fsm, &ctx, step.kind, e).await);
            }
        }

        if let Err(e) = fsm.process(DeploymentEvent::ProvisionSucceeded) {
            let e = StackError::InvalidTransition(e);
            return Err(self.fail_run(&mut fsm, &ctx, StepKind::Finalize, e).await);
        }
        let Some(endpoints) = ctx.endpoints.clone() else {
            let e = StackError::Internal("pipeline finished without endpoints".to_string());
            return Err(self.fail_run(&mut fsm, &ctx, StepKind::Finalize, e).await);
        };

        let mut running = ctx.deployment.clone();
        running.status = fsm.status();
        running.infrastructure = Some(ctx.infrastructure());
        let health = self.probe(&running).await;

        let deployment = match self.store.finalize(id, endpoints.clone(), Some(health)).await {
            Ok(deployment) => deployment,
            Err(e) => return Err(self.fail_run(&mut fsm, &ctx, StepKind::Finalize, e).await),
        };
        self.publisher.publish(&ProgressEvent::StatusChanged {
            deployment_id: id.to_string(),
            status: deployment.status,
        });
        self.publisher.publish(&ProgressEvent::Completed {
            deployment_id: id.to_string(),
            endpoints,
        });
        if let Some(endpoints) = &deployment.endpoints {
            info!("[{}] deployment running, chat UI at {}", id, endpoints.chat_ui);
        }
        Ok(deployment)
    }

    /// Thread a step output into the context, then log and publish it
    async fn record_step(
        &self,
        ctx: &mut PipelineContext,
        kind: StepKind,
        output: StepOutput,
        number: u8,
        total: u8,
    ) -> Result<(), StackError> {
        ctx.apply(kind, output)?;
        if kind == StepKind::ProvisionCompute {
            // Persist the handle so stop can release it even if a later step fails
            self.store
                .update_infrastructure(ctx.deployment_id(), ctx.infrastructure())
                .await?;
        }
        self.append_step(ctx, kind, number, total).await
    }

    async fn append_step(
        &self,
        ctx: &PipelineContext,
        kind: StepKind,
        number: u8,
        total: u8,
    ) -> Result<(), StackError> {
        let entry = DeploymentStep {
            deployment_id: ctx.deployment_id().to_string(),
            step: number,
            total_steps: total,
            description: kind.description().to_string(),
            percentage: step_percentage(number, total),
            timestamp: chrono::Utc::now(),
        };
        self.store.append_step(entry.clone()).await?;
        self.publisher.publish(&ProgressEvent::Step(entry));
        Ok(())
    }

    /// Persist the failure, publish it and hand the original error back
    async fn fail_run(
        &self,
        fsm: &mut DeploymentFsm,
        ctx: &PipelineContext,
        kind: StepKind,
        err: StackError,
    ) -> StackError {
        let id = ctx.deployment_id();
        let message = match &err {
            StackError::Cancelled => "cancelled".to_string(),
            e => format!("{}: {}", kind.description(), e),
        };
        error!("[{}] deployment failed: {}", id, message);

        if let Err(e) = fsm.process(DeploymentEvent::Fail(message.clone())) {
            warn!("[{}] {}", id, e);
        }
        if let Err(e) = self
            .set_status(id, DeploymentStatus::Failed, Some(message.clone()))
            .await
        {
            error!("[{}] failed to persist failure: {}", id, e);
        }
        self.publisher.publish(&ProgressEvent::Failed {
            deployment_id: id.to_string(),
            error: message,
        });

        if matches!(err, StackError::Cancelled) {
            let warnings = self.release(id, ctx.compute.as_ref()).await;
            for warning in warnings {
                warn!("[{}] cleanup of {}: {}", id, warning.resource, warning.message);
            }
        }
        err
    }

    /// Tear a deployment down. Failures become warnings.
    ///
    /// Running deployments go through STOPPING to STOPPED. A failed
    /// deployment is cleaned up but stays FAILED, a stopped one is left
    /// alone.
    pub async fn stop_deployment(&self, id: &str) -> Result<StopReport, StackError> {
        let deployment = self.store.get(id).await?;
        let mut fsm = DeploymentFsm::from_status(deployment.status);

        match deployment.status {
            DeploymentStatus::Stopped => {
                info!("[{}] already stopped", id);
                return Ok(StopReport {
                    deployment,
                    warnings: Vec::new(),
                });
            }
            DeploymentStatus::Failed => {
                let warnings = self.release(id, deployment.compute()).await;
                return Ok(StopReport {
                    deployment: self.store.get(id).await?,
                    warnings,
                });
            }
            DeploymentStatus::Running => {
                fsm.process(DeploymentEvent::Stop)
                    .map_err(StackError::InvalidTransition)?;
                self.set_status(id, fsm.status(), None).await?;
            }
            // A teardown that was interrupted is picked up again
            DeploymentStatus::Stopping => {}
            status => {
                return Err(StackError::InvalidTransition(format!(
                    "cannot stop deployment {} while {}",
                    id, status
                )));
            }
        }

        let warnings = self.release(id, deployment.compute()).await;

        fsm.process(DeploymentEvent::StopCompleted)
            .map_err(StackError::InvalidTransition)?;
        let deployment = self.set_status(id, fsm.status(), None).await?;
        info!("[{}] stopped with {} warnings", id, warnings.len());
        Ok(StopReport {
            deployment,
            warnings,
        })
    }

    /// Release the resources of a deployment.
    ///
    /// Without a recorded compute handle the run stopped inside step 1,
    /// after the instance may already have been created but before any
    /// container exists. The instance is then looked up by its name.
    async fn release(
        &self,
        id: &str,
        recorded: Option<&ProvisionedResource>,
    ) -> Vec<TeardownWarning> {
        if let Some(compute) = recorded {
            return self.teardown(id, compute).await;
        }

        let name = compute_name(id);
        let mut warnings = Vec::new();
        match self.gateways.compute.find(&name).await {
            Ok(Some(compute)) => {
                info!("[{}] releasing unrecorded compute {} ({})", id, compute.name, compute.id);
                let _ = policy::execute(
                    FailurePolicy::Warn,
                    &compute.name,
                    self.gateways.compute.terminate(&compute.id),
                    &mut warnings,
                )
                .await;
            }
            Ok(None) => debug!("[{}] no compute to release", id),
            Err(e) => {
                warn!("[{}] lookup of {} failed: {}", id, name, e);
                warnings.push(TeardownWarning {
                    resource: name,
                    message: e.to_string(),
                });
            }
        }
        warnings
    }

    /// Best-effort release of every resource of a deployment
    async fn teardown(&self, id: &str, compute: &ProvisionedResource) -> Vec<TeardownWarning> {
        let mut warnings = Vec::new();
        let gateways = &self.gateways;

        for service in [ServiceKind::ChatUi, ServiceKind::RetrievalPipeline] {
            let _ = policy::execute(
                FailurePolicy::Warn,
                &service.resource_name(id),
                gateways.containers.stop(compute, id, service),
                &mut warnings,
            )
            .await;
        }
        let _ = policy::execute(
            FailurePolicy::Warn,
            &ServiceKind::WorkflowEngine.resource_name(id),
            gateways.workflow.stop(compute, id),
            &mut warnings,
        )
        .await;
        for service in [ServiceKind::VectorStore, ServiceKind::ModelServer] {
            let _ = policy::execute(
                FailurePolicy::Warn,
                &service.resource_name(id),
                gateways.containers.stop(compute, id, service),
                &mut warnings,
            )
            .await;
        }
        let _ = policy::execute(
            FailurePolicy::Warn,
            &compute.name,
            gateways.compute.terminate(&compute.id),
            &mut warnings,
        )
        .await;

        warnings
    }

    /// Resize the compute of a running deployment
    pub async fn scale_deployment(
        &self,
        id: &str,
        config: InfrastructureConfig,
    ) -> Result<Deployment, StackError> {
        if config.gpu_count == 0 || config.memory_gb == 0 || config.storage_gb == 0 {
            return Err(StackError::ValidationError(
                "gpu_count, memory_gb and storage_gb must be positive".to_string(),
            ));
        }
        if config.gpu_type.trim().is_empty() {
            return Err(StackError::ValidationError("gpu_type must not be empty".to_string()));
        }

        let deployment = self.store.get(id).await?;
        if deployment.status != DeploymentStatus::Running {
            return Err(StackError::InvalidTransition(format!(
                "cannot scale deployment {} while {}",
                id, deployment.status
            )));
        }
        let compute = deployment
            .compute()
            .cloned()
            .ok_or_else(|| StackError::Internal(format!("deployment {} has no compute", id)))?;

        // The stored config only changes once the provider accepted the new shape
        self.gateways.compute.scale(&compute.id, &config).await?;
        info!(
            "[{}] scaled to {}x{} ({} GB / {} GB)",
            id, config.gpu_count, config.gpu_type, config.memory_gb, config.storage_gb
        );
        self.store
            .update_infrastructure(
                id,
                Infrastructure {
                    config,
                    compute: Some(compute),
                },
            )
            .await
    }

    /// Probe every service concurrently
    pub async fn get_deployment_health(&self, id: &str) -> Result<HealthReport, StackError> {
        let deployment = self.store.get(id).await?;
        Ok(self.probe(&deployment).await)
    }

    /// Probe and store the result as the latest snapshot
    pub async fn refresh_health(&self, id: &str) -> Result<HealthReport, StackError> {
        let report = self.get_deployment_health(id).await?;
        self.store.record_health(id, report.clone()).await?;
        Ok(report)
    }

    async fn probe(&self, deployment: &Deployment) -> HealthReport {
        let id = deployment.id.as_str();
        let mut report = HealthReport {
            deployment_id: id.to_string(),
            status: deployment.status,
            services: Default::default(),
            workflow_count: None,
            checked_at: chrono::Utc::now(),
        };

        let Some(compute) = deployment.compute() else {
            for service in ServiceKind::ALL {
                report.services.insert(service, ServiceHealth::NotFound);
            }
            return report;
        };

        let timeout = self.options.health_probe_timeout;
        let containers = join_all(CONTAINER_SERVICES.into_iter().map(|service| async move {
            let result = tokio::time::timeout(
                timeout,
                self.gateways.containers.health_check(compute, id, service),
            )
            .await;
            (service, probe_outcome(id, service, result))
        }));
        let workflow = tokio::time::timeout(timeout, self.gateways.workflow.health_check(compute, id));

        let (containers, workflow) = tokio::join!(containers, workflow);

        report.services.extend(containers);
        match workflow {
            Ok(Ok(health)) => {
                report.workflow_count = Some(health.workflow_count);
                report
                    .services
                    .insert(ServiceKind::WorkflowEngine, health.health);
            }
            other => {
                let result = other.map(|r| r.map(|h| h.health));
                let outcome = probe_outcome(id, ServiceKind::WorkflowEngine, result);
                report.services.insert(ServiceKind::WorkflowEngine, outcome);
            }
        }
        report.checked_at = chrono::Utc::now();
        report
    }

    /// Last log lines of one service
    pub async fn logs(
        &self,
        id: &str,
        service: ServiceKind,
        tail: usize,
    ) -> Result<Vec<String>, StackError> {
        let deployment = self.store.get(id).await?;
        let compute = deployment
            .compute()
            .ok_or_else(|| StackError::NotFound(format!("deployment {} has no compute", id)))?;
        self.gateways.containers.logs(compute, id, service, tail).await
    }

    async fn set_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<Deployment, StackError> {
        let deployment = self.store.update_status(id, status, error_message).await?;
        self.publisher.publish(&ProgressEvent::StatusChanged {
            deployment_id: id.to_string(),
            status,
        });
        Ok(deployment)
    }
}

fn probe_outcome(
    id: &str,
    service: ServiceKind,
    result: Result<Result<ServiceHealth, StackError>, tokio::time::error::Elapsed>,
) -> ServiceHealth {
    match result {
        Ok(Ok(health)) => health,
        Ok(Err(StackError::NotFound(_))) => ServiceHealth::NotFound,
        Ok(Err(e)) => {
            warn!("[{}] {} health probe failed: {}", id, service, e);
            ServiceHealth::Unhealthy
        }
        Err(_) => {
            warn!("[{}] {} health probe timed out", id, service);
            ServiceHealth::Unhealthy
        }
    }
}
