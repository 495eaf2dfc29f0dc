//! REST compute provider gateway

use std::collections::BTreeMap;

use async_trait::async_trait;
use openapi_client::models::{
    CreateInstanceRequest, InstanceResponse, InstanceStatus, ScaleInstanceRequest,
};
use tracing::{info, warn};

use crate::errors::StackError;
use crate::gateways::{ComputeProvisioner, ComputeRequest};
use crate::http::HttpClient;
use crate::models::deployment::InfrastructureConfig;
use crate::models::resource::{ProvisionedResource, ResourceStatus};

/// Compute provisioner backed by the provider's `/instances` API
pub struct HttpComputeProvisioner {
    client: HttpClient,
}

impl HttpComputeProvisioner {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComputeProvisioner for HttpComputeProvisioner {
    async fn provision(&self, request: &ComputeRequest) -> Result<ProvisionedResource, StackError> {
        let name = request.resource_name();
        let mut labels = BTreeMap::new();
        labels.insert("deployment_id".to_string(), request.deployment_id.clone());
        labels.insert("model_size".to_string(), request.model_size.to_string());
        labels.insert("compliance".to_string(), request.compliance.to_string());

        let body = CreateInstanceRequest {
            name: name.clone(),
            region: request.region.clone(),
            gpu_type: request.config.gpu_type.clone(),
            gpu_count: request.config.gpu_count,
            memory_gb: request.config.memory_gb,
            storage_gb: request.config.storage_gb,
            labels,
        };

        let instance = match self.client.create_instance(&body).await {
            Ok(instance) => {
                info!("Created instance {} ({})", instance.name, instance.id);
                instance
            }
            Err(StackError::Conflict(_)) => {
                info!("Instance {} already exists, reusing it", name);
                self.client.get_instance(&name).await?
            }
            Err(e) => return Err(e),
        };

        Ok(to_resource(instance))
    }

    async fn describe(&self, resource_id: &str) -> Result<ProvisionedResource, StackError> {
        match self.client.get_instance(resource_id).await {
            Ok(instance) => Ok(to_resource(instance)),
            Err(StackError::NotFound(_)) => Ok(ProvisionedResource {
                id: resource_id.to_string(),
                name: resource_id.to_string(),
                status: ResourceStatus::NotFound,
                endpoint: None,
                control_endpoint: None,
            }),
            Err(e) => Err(e),
        }
    }

    async fn find(&self, name: &str) -> Result<Option<ProvisionedResource>, StackError> {
        match self.client.get_instance(name).await {
            Ok(instance) => Ok(Some(to_resource(instance))),
            Err(StackError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn scale(&self, resource_id: &str, config: &InfrastructureConfig) -> Result<(), StackError> {
        let body = ScaleInstanceRequest {
            gpu_type: config.gpu_type.clone(),
            gpu_count: config.gpu_count,
            memory_gb: config.memory_gb,
            storage_gb: config.storage_gb,
        };
        let instance = self.client.scale_instance(resource_id, &body).await?;
        if instance.status == InstanceStatus::Failed {
            return Err(StackError::ProvisioningError(format!(
                "scaling {} failed: {}",
                resource_id,
                instance.error.unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn terminate(&self, resource_id: &str) -> Result<(), StackError> {
        match self.client.delete_instance(resource_id).await {
            Ok(()) => Ok(()),
            Err(StackError::NotFound(_)) => {
                warn!("Instance {} already gone", resource_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Map a provider instance onto a resource handle
pub fn to_resource(instance: InstanceResponse) -> ProvisionedResource {
    let status = match instance.status {
        // Containers need an address to land on
        InstanceStatus::Running if instance.public_host.is_some() => ResourceStatus::Ready,
        InstanceStatus::Running
        | InstanceStatus::Pending
        | InstanceStatus::Provisioning
        | InstanceStatus::Unknown => ResourceStatus::Pending,
        InstanceStatus::Failed => ResourceStatus::Failed(
            instance
                .error
                .clone()
                .unwrap_or_else(|| "instance failed".to_string()),
        ),
        InstanceStatus::Terminating | InstanceStatus::Terminated => {
            ResourceStatus::Failed("instance terminated".to_string())
        }
    };

    ProvisionedResource {
        id: instance.id,
        name: instance.name,
        status,
        endpoint: instance.public_host,
        control_endpoint: instance.docker_host,
    }
}
