//! Provisioned resource and health models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::StackError;

/// Readiness of an external resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum ResourceStatus {
    /// Created but not ready yet
    Pending,

    /// Ready to serve
    Ready,

    /// Not queryable (yet, or anymore)
    NotFound,

    /// The provider reported a failure
    Failed(String),
}

/// Handle returned by a provider gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    /// Provider resource id
    pub id: String,

    /// Deterministic resource name
    pub name: String,

    pub status: ResourceStatus,

    /// Public network endpoint (host or URL)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Management endpoint used to run containers on the resource
    #[serde(default)]
    pub control_endpoint: Option<String>,
}

/// Services making up a deployed stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    ModelServer,
    VectorStore,
    RetrievalPipeline,
    ChatUi,
    WorkflowEngine,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::ModelServer,
        ServiceKind::VectorStore,
        ServiceKind::RetrievalPipeline,
        ServiceKind::ChatUi,
        ServiceKind::WorkflowEngine,
    ];

    /// Container role prefix
    pub fn role(&self) -> &'static str {
        match self {
            ServiceKind::ModelServer => "llm",
            ServiceKind::VectorStore => "vectordb",
            ServiceKind::RetrievalPipeline => "rag",
            ServiceKind::ChatUi => "chat",
            ServiceKind::WorkflowEngine => "workflow",
        }
    }

    /// Deterministic resource name for a deployment
    pub fn resource_name(&self, deployment_id: &str) -> String {
        format!("{}-{}", self.role(), deployment_id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::ModelServer => "model_server",
            ServiceKind::VectorStore => "vector_store",
            ServiceKind::RetrievalPipeline => "retrieval_pipeline",
            ServiceKind::ChatUi => "chat_ui",
            ServiceKind::WorkflowEngine => "workflow_engine",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.role() == s)
            .ok_or_else(|| StackError::ValidationError(format!("Unknown service: {}", s)))
    }
}

/// Health of a single service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Healthy,
    Unhealthy,
    NotFound,
}

/// Workflow engine health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowHealth {
    pub health: ServiceHealth,
    pub workflow_count: usize,
}

/// Aggregated health of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub services: BTreeMap<ServiceKind, ServiceHealth>,
    #[serde(default)]
    pub workflow_count: Option<usize>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Whether every probed service answered healthy
    pub fn all_healthy(&self) -> bool {
        !self.services.is_empty() && self.services.values().all(|h| *h == ServiceHealth::Healthy)
    }
}
