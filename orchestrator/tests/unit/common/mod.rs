//! Mock gateways shared by the unit tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use stackpilot::deploy::orchestrator::{Orchestrator, OrchestratorOptions};
use stackpilot::deploy::pipeline::{PipelineContext, StepExecutor, StepOutput};
use stackpilot::deploy::readiness::PollOptions;
use stackpilot::errors::StackError;
use stackpilot::events::{BroadcastPublisher, ProgressEvent};
use stackpilot::gateways::compliance::actions_for;
use stackpilot::gateways::{
    Branding, ComplianceAction, ComplianceConfigurator, ComputeProvisioner, ComputeRequest,
    ContainerDeployer, Gateways, RetrievalConfig, WorkflowDeployer,
};
use stackpilot::models::deployment::{
    ComplianceClass, DeploymentIntent, Industry, InfrastructureConfig, ModelSize,
};
use stackpilot::models::resource::{
    ProvisionedResource, ResourceStatus, ServiceHealth, ServiceKind, WorkflowHealth,
};
use stackpilot::store::MemoryStore;

pub const HOST: &str = "10.0.0.5";

// ================================= COMPUTE ====================================== //

#[derive(Default)]
pub struct MockCompute {
    /// Instance ids by resource name
    instances: Mutex<HashMap<String, String>>,
    pub provision_calls: AtomicU32,
    pub describe_calls: AtomicU32,
    pub terminated: Mutex<Vec<String>>,
    pub scaled: Mutex<Vec<InfrastructureConfig>>,
    pub fail_reason: Mutex<Option<String>>,
    pub fail_terminate: Mutex<bool>,
    pub fail_scale: Mutex<bool>,
    /// Instances never leave the pending state
    pub booting: Mutex<bool>,
}

impl MockCompute {
    /// Report the instance as failed by the provider
    pub fn fail_with(&self, reason: &str) {
        *self.fail_reason.lock().unwrap() = Some(reason.to_string());
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    fn resource(&self, id: &str, name: &str) -> ProvisionedResource {
        let status = match self.fail_reason.lock().unwrap().clone() {
            Some(reason) => ResourceStatus::Failed(reason),
            None if *self.booting.lock().unwrap() => ResourceStatus::Pending,
            None => ResourceStatus::Ready,
        };
        ProvisionedResource {
            id: id.to_string(),
            name: name.to_string(),
            status,
            endpoint: Some(HOST.to_string()),
            control_endpoint: Some(format!("tcp://{}:2376", HOST)),
        }
    }
}

#[async_trait]
impl ComputeProvisioner for MockCompute {
    async fn provision(&self, request: &ComputeRequest) -> Result<ProvisionedResource, StackError> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        let name = request.resource_name();
        let mut instances = self.instances.lock().unwrap();
        let next = instances.len() + 1;
        let id = instances
            .entry(name.clone())
            .or_insert_with(|| format!("inst-{}", next))
            .clone();
        Ok(ProvisionedResource {
            id,
            name,
            status: ResourceStatus::Pending,
            endpoint: None,
            control_endpoint: None,
        })
    }

    async fn describe(&self, resource_id: &str) -> Result<ProvisionedResource, StackError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let name = self
            .instances
            .lock()
            .unwrap()
            .iter()
            .find(|(_, id)| id.as_str() == resource_id)
            .map(|(name, _)| name.clone());
        match name {
            Some(name) => Ok(self.resource(resource_id, &name)),
            None => Err(StackError::NotFound(resource_id.to_string())),
        }
    }

    async fn find(&self, name: &str) -> Result<Option<ProvisionedResource>, StackError> {
        let id = self.instances.lock().unwrap().get(name).cloned();
        Ok(id.map(|id| self.resource(&id, name)))
    }

    async fn scale(&self, _resource_id: &str, config: &InfrastructureConfig) -> Result<(), StackError> {
        if *self.fail_scale.lock().unwrap() {
            return Err(StackError::ProvisioningError("no capacity for new shape".to_string()));
        }
        self.scaled.lock().unwrap().push(config.clone());
        Ok(())
    }

    async fn terminate(&self, resource_id: &str) -> Result<(), StackError> {
        if *self.fail_terminate.lock().unwrap() {
            return Err(StackError::ProvisioningError("provider unavailable".to_string()));
        }
        self.terminated.lock().unwrap().push(resource_id.to_string());
        Ok(())
    }
}

// =============================== CONTAINERS ===================================== //

#[derive(Default)]
pub struct MockContainers {
    pub deployed: Mutex<Vec<ServiceKind>>,
    pub stopped: Mutex<Vec<ServiceKind>>,
    pub fail_stop: Mutex<HashSet<ServiceKind>>,
    pub deploy_delay: Mutex<HashMap<ServiceKind, Duration>>,
    pub health_delay: Mutex<HashMap<ServiceKind, Duration>>,
    pub missing: Mutex<HashSet<ServiceKind>>,
    pub model_ids: Mutex<Vec<String>>,
    pub chat_env: Mutex<Option<(String, String)>>,
}

impl MockContainers {
    async fn deploy(&self, service: ServiceKind, port: u16) -> Result<String, StackError> {
        let delay = self.deploy_delay.lock().unwrap().get(&service).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.deployed.lock().unwrap().push(service);
        Ok(format!("http://{}:{}", HOST, port))
    }

    pub fn stopped(&self) -> Vec<ServiceKind> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerDeployer for MockContainers {
    async fn deploy_model_server(
        &self,
        _compute: &ProvisionedResource,
        _deployment_id: &str,
        model_id: &str,
    ) -> Result<String, StackError> {
        self.model_ids.lock().unwrap().push(model_id.to_string());
        self.deploy(ServiceKind::ModelServer, 8080).await
    }

    async fn deploy_vector_store(
        &self,
        _compute: &ProvisionedResource,
        _deployment_id: &str,
    ) -> Result<String, StackError> {
        self.deploy(ServiceKind::VectorStore, 6333).await
    }

    async fn deploy_retrieval_pipeline(
        &self,
        _compute: &ProvisionedResource,
        _deployment_id: &str,
        config: RetrievalConfig<'_>,
    ) -> Result<String, StackError> {
        assert_eq!(config.vector_store_url, format!("http://{}:6333", HOST));
        self.deploy(ServiceKind::RetrievalPipeline, 8000).await
    }

    async fn deploy_chat_ui(
        &self,
        _compute: &ProvisionedResource,
        _deployment_id: &str,
        retrieval_url: &str,
        branding: &Branding,
    ) -> Result<String, StackError> {
        *self.chat_env.lock().unwrap() =
            Some((retrieval_url.to_string(), branding.deployment_name.clone()));
        self.deploy(ServiceKind::ChatUi, 8501).await
    }

    async fn stop(
        &self,
        _compute: &ProvisionedResource,
        _deployment_id: &str,
        service: ServiceKind,
    ) -> Result<(), StackError> {
        if self.fail_stop.lock().unwrap().contains(&service) {
            return Err(StackError::ProvisioningError(format!("{} stop failed", service)));
        }
        self.stopped.lock().unwrap().push(service);
        Ok(())
    }

    async fn health_check(
        &self,
        _compute: &ProvisionedResource,
        _deployment_id: &str,
        service: ServiceKind,
    ) -> Result<ServiceHealth, StackError> {
        let delay = self.health_delay.lock().unwrap().get(&service).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.missing.lock().unwrap().contains(&service) {
            return Ok(ServiceHealth::NotFound);
        }
        Ok(ServiceHealth::Healthy)
    }

    async fn logs(
        &self,
        _compute: &ProvisionedResource,
        deployment_id: &str,
        service: ServiceKind,
        tail: usize,
    ) -> Result<Vec<String>, StackError> {
        Ok((0..tail.min(3))
            .map(|n| format!("{} line {}", service.resource_name(deployment_id), n))
            .collect())
    }
}

// ================================ WORKFLOW ====================================== //

#[derive(Default)]
pub struct MockWorkflow {
    pub templates: Mutex<Vec<String>>,
    pub stopped: AtomicU32,
    pub fail_stop: Mutex<bool>,
    pub health_delay: Mutex<Option<Duration>>,
}

#[async_trait]
impl WorkflowDeployer for MockWorkflow {
    async fn deploy(
        &self,
        _compute: &ProvisionedResource,
        _deployment_id: &str,
        templates: &[&str],
    ) -> Result<String, StackError> {
        *self.templates.lock().unwrap() = templates.iter().map(|t| t.to_string()).collect();
        Ok(format!("http://{}:5678", HOST))
    }

    async fn health_check(
        &self,
        _compute: &ProvisionedResource,
        _deployment_id: &str,
    ) -> Result<WorkflowHealth, StackError> {
        let delay = *self.health_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(WorkflowHealth {
            health: ServiceHealth::Healthy,
            workflow_count: self.templates.lock().unwrap().len(),
        })
    }

    async fn stop(&self, _compute: &ProvisionedResource, _deployment_id: &str) -> Result<(), StackError> {
        if *self.fail_stop.lock().unwrap() {
            return Err(StackError::ProvisioningError("workflow engine unreachable".to_string()));
        }
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================== COMPLIANCE ===================================== //

#[derive(Default)]
pub struct MockCompliance {
    pub applied: Mutex<Vec<(ComplianceClass, Vec<ComplianceAction>)>>,
    pub endpoints: Mutex<Vec<String>>,
}

#[async_trait]
impl ComplianceConfigurator for MockCompliance {
    async fn apply(
        &self,
        _compute: &ProvisionedResource,
        class: ComplianceClass,
        region: &str,
        endpoints: &[String],
    ) -> Result<Vec<ComplianceAction>, StackError> {
        let actions = actions_for(class, region);
        self.applied.lock().unwrap().push((class, actions.clone()));
        *self.endpoints.lock().unwrap() = endpoints.to_vec();
        Ok(actions)
    }
}

// ================================= HARNESS ====================================== //

/// Step executor that always fails
pub struct FailingStep(pub &'static str);

#[async_trait]
impl StepExecutor for FailingStep {
    async fn execute(&self, _ctx: &PipelineContext) -> Result<StepOutput, StackError> {
        Err(StackError::ProvisioningError(self.0.to_string()))
    }
}

#[derive(Default, Clone)]
pub struct Mocks {
    pub compute: Arc<MockCompute>,
    pub containers: Arc<MockContainers>,
    pub workflow: Arc<MockWorkflow>,
    pub compliance: Arc<MockCompliance>,
}

impl Mocks {
    pub fn gateways(&self) -> Gateways {
        Gateways {
            compute: self.compute.clone(),
            containers: self.containers.clone(),
            workflow: self.workflow.clone(),
            compliance: self.compliance.clone(),
        }
    }
}

pub fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        health_probe_timeout: Duration::from_secs(10),
        compute_poll: PollOptions::new(Duration::from_secs(60), Duration::from_secs(1)),
    }
}

/// Orchestrator over the mocks with an in-memory store
pub fn orchestrator(mocks: &Mocks) -> (Orchestrator, BroadcastPublisher) {
    let events = BroadcastPublisher::new(256);
    let orchestrator = Orchestrator::new(
        Arc::new(MemoryStore::new()),
        Arc::new(events.clone()),
        mocks.gateways(),
        options(),
    );
    (orchestrator, events)
}

pub fn intent(model_size: ModelSize, compliance: ComplianceClass, region: &str) -> DeploymentIntent {
    DeploymentIntent {
        name: None,
        model_size,
        region: region.to_string(),
        compliance,
        industry: Industry::Legal,
        use_case: None,
    }
}

/// Drain every event received so far
pub fn drain(receiver: &mut tokio::sync::broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Submit and run a deployment to RUNNING
pub async fn running_deployment(orchestrator: &Orchestrator) -> String {
    let deployment = orchestrator
        .submit("org-1", intent(ModelSize::Small, ComplianceClass::Baseline, "us-east"))
        .await
        .unwrap();
    orchestrator.run_pipeline(&deployment.id).await.unwrap();
    deployment.id
}
