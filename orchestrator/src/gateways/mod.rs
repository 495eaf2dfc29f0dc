//! Provider gateways
//!
//! One trait per external capability. Implementations are built once at
//! startup and injected into the orchestrator through [`Gateways`].
//!
//! Provisioning calls must be safe to retry: resources are named after the
//! deployment id and their role, and an "already exists" answer from the
//! provider counts as success.

pub mod compliance;
pub mod compute;
pub mod docker;
pub mod workflow;

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::StackError;
use crate::models::deployment::{ComplianceClass, Industry, InfrastructureConfig, ModelSize};
use crate::models::resource::{ProvisionedResource, ServiceHealth, ServiceKind, WorkflowHealth};

pub use compliance::ComplianceAction;

/// Compute provisioning request
#[derive(Debug, Clone)]
pub struct ComputeRequest {
    pub deployment_id: String,
    pub region: String,
    pub model_size: ModelSize,
    pub compliance: ComplianceClass,
    pub config: InfrastructureConfig,
}

impl ComputeRequest {
    /// Deterministic instance name
    pub fn resource_name(&self) -> String {
        compute_name(&self.deployment_id)
    }
}

/// Name of the compute instance of a deployment
pub fn compute_name(deployment_id: &str) -> String {
    format!("gpu-{}", deployment_id)
}

/// Chat UI branding
#[derive(Debug, Clone)]
pub struct Branding {
    pub deployment_name: String,
    pub industry: Industry,
}

/// Retrieval pipeline wiring
#[derive(Debug, Clone)]
pub struct RetrievalConfig<'a> {
    pub vector_store_url: &'a str,
    pub model_server_url: &'a str,
    pub industry: Industry,
    pub use_case: Option<&'a str>,
}

/// GPU compute provisioning
#[async_trait]
pub trait ComputeProvisioner: Send + Sync {
    /// Create (or find) the instance for a deployment
    async fn provision(&self, request: &ComputeRequest) -> Result<ProvisionedResource, StackError>;

    /// Current view of an instance
    async fn describe(&self, resource_id: &str) -> Result<ProvisionedResource, StackError>;

    /// Look an instance up by name, `None` when the provider has no such instance
    async fn find(&self, name: &str) -> Result<Option<ProvisionedResource>, StackError>;

    /// Change the instance shape
    async fn scale(&self, resource_id: &str, config: &InfrastructureConfig) -> Result<(), StackError>;

    /// Release the instance
    async fn terminate(&self, resource_id: &str) -> Result<(), StackError>;
}

/// Service containers running on the compute instance
#[async_trait]
pub trait ContainerDeployer: Send + Sync {
    async fn deploy_model_server(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        model_id: &str,
    ) -> Result<String, StackError>;

    async fn deploy_vector_store(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
    ) -> Result<String, StackError>;

    async fn deploy_retrieval_pipeline(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        config: RetrievalConfig<'_>,
    ) -> Result<String, StackError>;

    async fn deploy_chat_ui(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        retrieval_url: &str,
        branding: &Branding,
    ) -> Result<String, StackError>;

    /// Stop and remove one service container
    async fn stop(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        service: ServiceKind,
    ) -> Result<(), StackError>;

    async fn health_check(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        service: ServiceKind,
    ) -> Result<ServiceHealth, StackError>;

    /// Last `tail` log lines of a service
    async fn logs(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        service: ServiceKind,
        tail: usize,
    ) -> Result<Vec<String>, StackError>;
}

/// Workflow engine
#[async_trait]
pub trait WorkflowDeployer: Send + Sync {
    /// Start the engine and import templates, returns the engine URL
    async fn deploy(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        templates: &[&str],
    ) -> Result<String, StackError>;

    async fn health_check(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
    ) -> Result<WorkflowHealth, StackError>;

    async fn stop(&self, compute: &ProvisionedResource, deployment_id: &str) -> Result<(), StackError>;
}

/// Compliance controls
#[async_trait]
pub trait ComplianceConfigurator: Send + Sync {
    /// Apply every action of the variant, returns the applied actions in order
    async fn apply(
        &self,
        compute: &ProvisionedResource,
        class: ComplianceClass,
        region: &str,
        endpoints: &[String],
    ) -> Result<Vec<ComplianceAction>, StackError>;
}

/// Gateway set injected into the orchestrator
#[derive(Clone)]
pub struct Gateways {
    pub compute: Arc<dyn ComputeProvisioner>,
    pub containers: Arc<dyn ContainerDeployer>,
    pub workflow: Arc<dyn WorkflowDeployer>,
    pub compliance: Arc<dyn ComplianceConfigurator>,
}

/// Host part of a resource endpoint, accepting bare hosts and URLs
pub fn endpoint_host(endpoint: &str) -> Option<String> {
    match url::Url::parse(endpoint) {
        Ok(url) if url.host_str().is_some() => url.host_str().map(|h| h.to_string()),
        _ => {
            let host = endpoint.split(':').next().unwrap_or(endpoint).trim();
            if host.is_empty() {
                None
            } else {
                Some(host.to_string())
            }
        }
    }
}
