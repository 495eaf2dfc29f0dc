//! Provisioning pipeline
//!
//! The pipeline is a table of steps. Every row names its kind, the failure
//! policy it runs under and an executor. Executors read what earlier steps
//! produced from the [`PipelineContext`] and return a [`StepOutput`] that the
//! orchestrator threads back into the context before the next row runs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::deploy::policy::FailurePolicy;
use crate::deploy::readiness::{wait_until_ready, PollOptions};
use crate::errors::StackError;
use crate::gateways::{
    Branding, ComplianceAction, ComplianceConfigurator, ComputeProvisioner, ComputeRequest,
    ContainerDeployer, Gateways, RetrievalConfig, WorkflowDeployer,
};
use crate::models::deployment::{Deployment, Endpoints, Infrastructure, InfrastructureConfig};
use crate::models::resource::ProvisionedResource;

/// Pipeline step kinds, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    ProvisionCompute,
    DeployModelServer,
    DeployVectorStore,
    DeployRetrievalPipeline,
    DeployWorkflowEngine,
    DeployChatUi,
    ConfigureCompliance,
    Finalize,
}

impl StepKind {
    pub const ORDER: [StepKind; 8] = [
        StepKind::ProvisionCompute,
        StepKind::DeployModelServer,
        StepKind::DeployVectorStore,
        StepKind::DeployRetrievalPipeline,
        StepKind::DeployWorkflowEngine,
        StepKind::DeployChatUi,
        StepKind::ConfigureCompliance,
        StepKind::Finalize,
    ];

    /// Human readable task description, used in the step log
    pub fn description(&self) -> &'static str {
        match self {
            StepKind::ProvisionCompute => "Provisioning GPU compute",
            StepKind::DeployModelServer => "Deploying model server",
            StepKind::DeployVectorStore => "Deploying vector store",
            StepKind::DeployRetrievalPipeline => "Deploying retrieval pipeline",
            StepKind::DeployWorkflowEngine => "Deploying workflow engine",
            StepKind::DeployChatUi => "Deploying chat UI",
            StepKind::ConfigureCompliance => "Configuring compliance controls",
            StepKind::Finalize => "Finalizing deployment",
        }
    }
}

/// Integer percentage of `step` out of `total` (12, 25, 37, ... for 8 steps)
pub fn step_percentage(step: u8, total: u8) -> u8 {
    if total == 0 {
        return 100;
    }
    (u32::from(step) * 100 / u32::from(total)).min(100) as u8
}

/// What a step produced
#[derive(Debug, Clone)]
pub enum StepOutput {
    Compute(ProvisionedResource),
    Endpoint(String),
    Compliance(Vec<ComplianceAction>),
    Endpoints(Endpoints),
}

/// Values threaded between steps of one run
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub deployment: Deployment,
    pub config: InfrastructureConfig,
    pub compute: Option<ProvisionedResource>,
    pub model_server_url: Option<String>,
    pub vector_store_url: Option<String>,
    pub retrieval_url: Option<String>,
    pub workflow_url: Option<String>,
    pub chat_ui_url: Option<String>,
    pub compliance_actions: Vec<ComplianceAction>,
    pub endpoints: Option<Endpoints>,
}

impl PipelineContext {
    pub fn new(deployment: Deployment) -> Self {
        let config = deployment
            .infrastructure
            .as_ref()
            .map(|i| i.config.clone())
            .unwrap_or_else(|| InfrastructureConfig::for_model_size(deployment.intent.model_size));
        Self {
            deployment,
            config,
            compute: None,
            model_server_url: None,
            vector_store_url: None,
            retrieval_url: None,
            workflow_url: None,
            chat_ui_url: None,
            compliance_actions: Vec::new(),
            endpoints: None,
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment.id
    }

    pub fn infrastructure(&self) -> Infrastructure {
        Infrastructure {
            config: self.config.clone(),
            compute: self.compute.clone(),
        }
    }

    pub fn require_compute(&self) -> Result<&ProvisionedResource, StackError> {
        self.compute
            .as_ref()
            .ok_or_else(|| StackError::Internal("compute has not been provisioned".to_string()))
    }

    fn require<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str, StackError> {
        value
            .as_deref()
            .ok_or_else(|| StackError::Internal(format!("{} endpoint is not available", what)))
    }

    /// Service URLs deployed so far
    pub fn service_urls(&self) -> Vec<String> {
        [
            &self.model_server_url,
            &self.vector_store_url,
            &self.retrieval_url,
            &self.workflow_url,
            &self.chat_ui_url,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }

    /// Thread a step output into the context
    pub fn apply(&mut self, kind: StepKind, output: StepOutput) -> Result<(), StackError> {
        match (kind, output) {
            (StepKind::ProvisionCompute, StepOutput::Compute(resource)) => {
                self.compute = Some(resource)
            }
            (StepKind::DeployModelServer, StepOutput::Endpoint(url)) => {
                self.model_server_url = Some(url)
            }
            (StepKind::DeployVectorStore, StepOutput::Endpoint(url)) => {
                self.vector_store_url = Some(url)
            }
            (StepKind::DeployRetrievalPipeline, StepOutput::Endpoint(url)) => {
                self.retrieval_url = Some(url)
            }
            (StepKind::DeployWorkflowEngine, StepOutput::Endpoint(url)) => {
                self.workflow_url = Some(url)
            }
            (StepKind::DeployChatUi, StepOutput::Endpoint(url)) => self.chat_ui_url = Some(url),
            (StepKind::ConfigureCompliance, StepOutput::Compliance(actions)) => {
                self.compliance_actions = actions
            }
            (StepKind::Finalize, StepOutput::Endpoints(endpoints)) => {
                self.endpoints = Some(endpoints)
            }
            (kind, output) => {
                return Err(StackError::Internal(format!(
                    "step {:?} produced unexpected output {:?}",
                    kind, output
                )));
            }
        }
        Ok(())
    }
}

/// Executes one pipeline step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, ctx: &PipelineContext) -> Result<StepOutput, StackError>;
}

/// One row of the step table
#[derive(Clone)]
pub struct PipelineStep {
    pub kind: StepKind,
    pub policy: FailurePolicy,
    pub executor: Arc<dyn StepExecutor>,
}

/// Ordered step table
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
}

impl Pipeline {
    /// The 8-step provisioning pipeline backed by the provider gateways
    pub fn standard(gateways: &Gateways, compute_poll: PollOptions) -> Self {
        let steps = StepKind::ORDER
            .into_iter()
            .map(|kind| {
                let executor: Arc<dyn StepExecutor> = match kind {
                    StepKind::ProvisionCompute => Arc::new(ProvisionComputeStep {
                        compute: gateways.compute.clone(),
                        poll: compute_poll,
                    }),
                    StepKind::DeployModelServer => Arc::new(ModelServerStep {
                        containers: gateways.containers.clone(),
                    }),
                    StepKind::DeployVectorStore => Arc::new(VectorStoreStep {
                        containers: gateways.containers.clone(),
                    }),
                    StepKind::DeployRetrievalPipeline => Arc::new(RetrievalPipelineStep {
                        containers: gateways.containers.clone(),
                    }),
                    StepKind::DeployWorkflowEngine => Arc::new(WorkflowEngineStep {
                        workflow: gateways.workflow.clone(),
                    }),
                    StepKind::DeployChatUi => Arc::new(ChatUiStep {
                        containers: gateways.containers.clone(),
                    }),
                    StepKind::ConfigureCompliance => Arc::new(ComplianceStep {
                        compliance: gateways.compliance.clone(),
                    }),
                    StepKind::Finalize => Arc::new(FinalizeStep),
                };
                PipelineStep {
                    kind,
                    policy: FailurePolicy::Fatal,
                    executor,
                }
            })
            .collect();

        Self { steps }
    }

    /// Replace the executor of one step
    pub fn with_executor(mut self, kind: StepKind, executor: Arc<dyn StepExecutor>) -> Self {
        for step in self.steps.iter_mut().filter(|s| s.kind == kind) {
            step.executor = executor.clone();
        }
        self
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// ================================ EXECUTORS ====================================== //

struct ProvisionComputeStep {
    compute: Arc<dyn ComputeProvisioner>,
    poll: PollOptions,
}

#[async_trait]
impl StepExecutor for ProvisionComputeStep {
    async fn execute(&self, ctx: &PipelineContext) -> Result<StepOutput, StackError> {
        let intent = &ctx.deployment.intent;
        let request = ComputeRequest {
            deployment_id: ctx.deployment_id().to_string(),
            region: intent.region.clone(),
            model_size: intent.model_size,
            compliance: intent.compliance,
            config: ctx.config.clone(),
        };

        let resource = self.compute.provision(&request).await?;
        info!(
            "Compute {} ({}) requested in {}, waiting for readiness",
            resource.name, resource.id, request.region
        );

        let compute = self.compute.clone();
        let resource_id = resource.id.clone();
        wait_until_ready(
            &resource.name,
            || {
                let compute = compute.clone();
                let resource_id = resource_id.clone();
                async move { compute.describe(&resource_id).await.map(|r| r.status) }
            },
            self.poll,
        )
        .await?;

        // Refresh the cached handle, endpoints are only known once running
        let ready = self.compute.describe(&resource.id).await?;
        Ok(StepOutput::Compute(ready))
    }
}

struct ModelServerStep {
    containers: Arc<dyn ContainerDeployer>,
}

#[async_trait]
impl StepExecutor for ModelServerStep {
    async fn execute(&self, ctx: &PipelineContext) -> Result<StepOutput, StackError> {
        let model_id = ctx.deployment.intent.model_size.model_id();
        let url = self
            .containers
            .deploy_model_server(ctx.require_compute()?, ctx.deployment_id(), model_id)
            .await?;
        Ok(StepOutput::Endpoint(url))
    }
}

struct VectorStoreStep {
    containers: Arc<dyn ContainerDeployer>,
}

#[async_trait]
impl StepExecutor for VectorStoreStep {
    async fn execute(&self, ctx: &PipelineContext) -> Result<StepOutput, StackError> {
        let url = self
            .containers
            .deploy_vector_store(ctx.require_compute()?, ctx.deployment_id())
            .await?;
        Ok(StepOutput::Endpoint(url))
    }
}

struct RetrievalPipelineStep {
    containers: Arc<dyn ContainerDeployer>,
}

#[async_trait]
impl StepExecutor for RetrievalPipelineStep {
    async fn execute(&self, ctx: &PipelineContext) -> Result<StepOutput, StackError> {
        let intent = &ctx.deployment.intent;
        let config = RetrievalConfig {
            vector_store_url: PipelineContext::require(&ctx.vector_store_url, "vector store")?,
            model_server_url: PipelineContext::require(&ctx.model_server_url, "model server")?,
            industry: intent.industry,
            use_case: intent.use_case.as_deref(),
        };
        let url = self
            .containers
            .deploy_retrieval_pipeline(ctx.require_compute()?, ctx.deployment_id(), config)
            .await?;
        Ok(StepOutput::Endpoint(url))
    }
}

struct WorkflowEngineStep {
    workflow: Arc<dyn WorkflowDeployer>,
}

#[async_trait]
impl StepExecutor for WorkflowEngineStep {
    async fn execute(&self, ctx: &PipelineContext) -> Result<StepOutput, StackError> {
        let templates = ctx.deployment.intent.industry.workflow_templates();
        let url = self
            .workflow
            .deploy(ctx.require_compute()?, ctx.deployment_id(), templates)
            .await?;
        Ok(StepOutput::Endpoint(url))
    }
}

struct ChatUiStep {
    containers: Arc<dyn ContainerDeployer>,
}

#[async_trait]
impl StepExecutor for ChatUiStep {
    async fn execute(&self, ctx: &PipelineContext) -> Result<StepOutput, StackError> {
        let intent = &ctx.deployment.intent;
        let branding = Branding {
            deployment_name: intent.display_name(),
            industry: intent.industry,
        };
        let retrieval_url = PipelineContext::require(&ctx.retrieval_url, "retrieval pipeline")?;
        let url = self
            .containers
            .deploy_chat_ui(ctx.require_compute()?, ctx.deployment_id(), retrieval_url, &branding)
            .await?;
        Ok(StepOutput::Endpoint(url))
    }
}

struct ComplianceStep {
    compliance: Arc<dyn ComplianceConfigurator>,
}

#[async_trait]
impl StepExecutor for ComplianceStep {
    async fn execute(&self, ctx: &PipelineContext) -> Result<StepOutput, StackError> {
        let intent = &ctx.deployment.intent;
        let actions = self
            .compliance
            .apply(
                ctx.require_compute()?,
                intent.compliance,
                &intent.region,
                &ctx.service_urls(),
            )
            .await?;
        Ok(StepOutput::Compliance(actions))
    }
}

struct FinalizeStep;

#[async_trait]
impl StepExecutor for FinalizeStep {
    async fn execute(&self, ctx: &PipelineContext) -> Result<StepOutput, StackError> {
        let chat_ui = PipelineContext::require(&ctx.chat_ui_url, "chat UI")?;
        let api = PipelineContext::require(&ctx.retrieval_url, "retrieval pipeline")?;
        let workflow = PipelineContext::require(&ctx.workflow_url, "workflow engine")?;
        Ok(StepOutput::Endpoints(Endpoints::new(
            chat_ui.to_string(),
            api.to_string(),
            workflow.to_string(),
        )))
    }
}
