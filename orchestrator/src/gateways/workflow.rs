//! Workflow engine gateway

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openapi_client::models::WorkflowImportRequest;
use secrecy::SecretString;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::deploy::readiness::{wait_until_ready, PollOptions};
use crate::errors::StackError;
use crate::gateways::docker::{service_ports, service_url, ContainerSpec, DockerContainerDeployer};
use crate::gateways::{ContainerDeployer, WorkflowDeployer};
use crate::http::{AuthScheme, HttpClient};
use crate::models::resource::{
    ProvisionedResource, ResourceStatus, ServiceHealth, ServiceKind, WorkflowHealth,
};

/// Header carrying the engine API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Workflow engine running as a container next to the other services
pub struct EngineWorkflowDeployer {
    containers: Arc<DockerContainerDeployer>,
    poll: PollOptions,
    api_key: Option<SecretString>,
    request_timeout: Duration,
}

impl EngineWorkflowDeployer {
    pub fn new(
        containers: Arc<DockerContainerDeployer>,
        poll: PollOptions,
        api_key: Option<SecretString>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            containers,
            poll,
            api_key,
            request_timeout,
        }
    }

    fn client(&self, url: &str) -> Result<HttpClient, StackError> {
        Ok(HttpClient::new(url, self.request_timeout)?
            .with_api_key(self.api_key.clone(), AuthScheme::Header(API_KEY_HEADER)))
    }

    /// Import the templates the engine does not know yet
    async fn import_templates(&self, client: &HttpClient, templates: &[&str]) -> Result<usize, StackError> {
        let existing: HashSet<String> = client
            .list_workflows()
            .await?
            .into_iter()
            .map(|w| w.name)
            .collect();

        let mut imported = 0;
        for template in templates {
            if existing.contains(*template) {
                debug!("Workflow template {} already present", template);
                continue;
            }
            client.import_workflow(&template_request(template)).await?;
            imported += 1;
        }
        Ok(imported)
    }
}

/// Import request for a named template, a webhook trigger feeding the
/// retrieval pipeline
pub fn template_request(name: &str) -> WorkflowImportRequest {
    WorkflowImportRequest {
        name: name.to_string(),
        nodes: vec![json!({
            "name": "Trigger",
            "type": "webhook",
            "parameters": { "path": name, "method": "POST" },
        })],
        connections: json!({}),
        settings: json!({ "executionOrder": "v1" }),
    }
}

/// Engine health with its workflow count. A healthy engine whose list call
/// fails still reports healthy, with no workflows counted.
pub async fn probe_engine(client: &HttpClient) -> WorkflowHealth {
    let health = match client.engine_health().await {
        Ok(_) => ServiceHealth::Healthy,
        Err(StackError::NotFound(_)) => ServiceHealth::NotFound,
        Err(e) => {
            debug!("Workflow engine at {} unhealthy: {}", client.base_url(), e);
            ServiceHealth::Unhealthy
        }
    };
    let workflow_count = match health {
        ServiceHealth::Healthy => match client.list_workflows().await {
            Ok(workflows) => workflows.len(),
            Err(e) => {
                warn!("Failed to list workflows at {}: {}", client.base_url(), e);
                0
            }
        },
        _ => 0,
    };

    WorkflowHealth {
        health,
        workflow_count,
    }
}

#[async_trait]
impl WorkflowDeployer for EngineWorkflowDeployer {
    async fn deploy(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        templates: &[&str],
    ) -> Result<String, StackError> {
        let service = ServiceKind::WorkflowEngine;
        let mut spec = ContainerSpec {
            name: service.resource_name(deployment_id),
            image: self.containers.images().workflow_engine.clone(),
            ports: vec![service_ports(service)],
            volumes: vec![format!("workflow-{}:/home/node/.n8n", deployment_id)],
            ..Default::default()
        };
        spec.env.push(("DEPLOYMENT_ID".to_string(), deployment_id.to_string()));
        if let Some(key) = &self.api_key {
            spec.secrets.push(("ENGINE_API_KEY".to_string(), key.clone()));
        }

        let url = self
            .containers
            .run_service(compute, service, &spec, self.poll)
            .await?;

        // The container may be up before the API answers
        let client = self.client(&url)?;
        wait_until_ready(
            &format!("{} api", spec.name),
            || {
                let client = client.clone();
                async move {
                    match client.engine_health().await {
                        Ok(_) => Ok(ResourceStatus::Ready),
                        Err(StackError::NotFound(_)) => Ok(ResourceStatus::NotFound),
                        Err(e) => Err(e),
                    }
                }
            },
            self.poll,
        )
        .await?;

        let imported = self.import_templates(&client, templates).await?;
        info!(
            "Workflow engine ready at {} ({} of {} templates imported)",
            url,
            imported,
            templates.len()
        );
        Ok(url)
    }

    async fn health_check(
        &self,
        compute: &ProvisionedResource,
        _deployment_id: &str,
    ) -> Result<WorkflowHealth, StackError> {
        let url = service_url(compute, ServiceKind::WorkflowEngine)?;
        Ok(probe_engine(&self.client(&url)?).await)
    }

    async fn stop(&self, compute: &ProvisionedResource, deployment_id: &str) -> Result<(), StackError> {
        self.containers
            .stop(compute, deployment_id, ServiceKind::WorkflowEngine)
            .await
    }
}
