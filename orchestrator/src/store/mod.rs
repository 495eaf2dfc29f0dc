//! Deployment state store
//!
//! The store is the durable record of every deployment and its step log.
//! Both backends share [`StoredDeployment`], which enforces the record
//! invariants: endpoints only while running, an error message only when
//! failed, and a strictly increasing step log whose percentages never go
//! down.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::StackError;
use crate::models::deployment::{Deployment, DeploymentStep, Endpoints, Infrastructure};
use crate::models::resource::HealthReport;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Durable deployment records
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment, ids must be unique
    async fn create(&self, deployment: &Deployment) -> Result<(), StackError>;

    /// Fetch a deployment, `NotFound` if unknown
    async fn get(&self, id: &str) -> Result<Deployment, StackError>;

    /// All deployments, oldest first
    async fn list(&self) -> Result<Vec<Deployment>, StackError>;

    /// Set the status. `error_message` is kept only for `Failed`.
    async fn update_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<Deployment, StackError>;

    /// Append a step log entry
    async fn append_step(&self, step: DeploymentStep) -> Result<(), StackError>;

    /// Step log of a deployment
    async fn steps(&self, id: &str) -> Result<Vec<DeploymentStep>, StackError>;

    /// Replace the infrastructure record
    async fn update_infrastructure(
        &self,
        id: &str,
        infrastructure: Infrastructure,
    ) -> Result<Deployment, StackError>;

    /// Mark the deployment running with its endpoints and first health snapshot
    async fn finalize(
        &self,
        id: &str,
        endpoints: Endpoints,
        health: Option<HealthReport>,
    ) -> Result<Deployment, StackError>;

    /// Store the latest health snapshot
    async fn record_health(&self, id: &str, report: HealthReport) -> Result<(), StackError>;
}

/// A deployment together with its step log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDeployment {
    pub deployment: Deployment,

    #[serde(default)]
    pub steps: Vec<DeploymentStep>,
}

impl StoredDeployment {
    pub fn new(deployment: Deployment) -> Self {
        Self {
            deployment,
            steps: Vec::new(),
        }
    }

    pub fn set_status(&mut self, status: DeploymentStatus, error_message: Option<String>) {
        let deployment = &mut self.deployment;
        deployment.status = status;
        deployment.error_message = match status {
            DeploymentStatus::Failed => error_message,
            _ => None,
        };
        if status != DeploymentStatus::Running {
            deployment.endpoints = None;
        }
        deployment.updated_at = Utc::now();
    }

    pub fn push_step(&mut self, step: DeploymentStep) -> Result<(), StackError> {
        if step.percentage > 100 || step.step == 0 || step.step > step.total_steps {
            return Err(StackError::ValidationError(format!(
                "step {}/{} at {}% is out of range",
                step.step, step.total_steps, step.percentage
            )));
        }
        if let Some(last) = self.steps.last() {
            if step.step <= last.step || step.percentage < last.percentage {
                return Err(StackError::ValidationError(format!(
                    "step {} ({}%) does not follow step {} ({}%)",
                    step.step, step.percentage, last.step, last.percentage
                )));
            }
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn set_infrastructure(&mut self, infrastructure: Infrastructure) {
        self.deployment.infrastructure = Some(infrastructure);
        self.deployment.updated_at = Utc::now();
    }

    pub fn finalize(&mut self, endpoints: Endpoints, health: Option<HealthReport>) {
        self.set_status(DeploymentStatus::Running, None);
        self.deployment.endpoints = Some(endpoints);
        if health.is_some() {
            self.deployment.health = health;
        }
    }

    pub fn set_health(&mut self, report: HealthReport) {
        self.deployment.health = Some(report);
    }
}

fn not_found(id: &str) -> StackError {
    StackError::NotFound(format!("deployment {}", id))
}
