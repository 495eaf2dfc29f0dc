//! In-memory deployment store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::StackError;
use crate::models::deployment::{Deployment, DeploymentStep, Endpoints, Infrastructure};
use crate::models::resource::HealthReport;
use crate::store::{not_found, DeploymentStore, StoredDeployment};

/// Store keeping every record in process memory
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, StoredDeployment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn mutate<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut StoredDeployment) -> Result<T, StackError>,
    ) -> Result<T, StackError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| not_found(id))?;
        f(record)
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create(&self, deployment: &Deployment) -> Result<(), StackError> {
        let mut records = self.records.write().await;
        if records.contains_key(&deployment.id) {
            return Err(StackError::Conflict(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        records.insert(deployment.id.clone(), StoredDeployment::new(deployment.clone()));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Deployment, StackError> {
        let records = self.records.read().await;
        records
            .get(id)
            .map(|r| r.deployment.clone())
            .ok_or_else(|| not_found(id))
    }

    async fn list(&self) -> Result<Vec<Deployment>, StackError> {
        let records = self.records.read().await;
        let mut deployments: Vec<Deployment> =
            records.values().map(|r| r.deployment.clone()).collect();
        deployments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(deployments)
    }

    async fn update_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<Deployment, StackError> {
        self.mutate(id, |record| {
            record.set_status(status, error_message);
            Ok(record.deployment.clone())
        })
        .await
    }

    async fn append_step(&self, step: DeploymentStep) -> Result<(), StackError> {
        let id = step.deployment_id.clone();
        self.mutate(&id, |record| record.push_step(step)).await
    }

    async fn steps(&self, id: &str) -> Result<Vec<DeploymentStep>, StackError> {
        let records = self.records.read().await;
        records
            .get(id)
            .map(|r| r.steps.clone())
            .ok_or_else(|| not_found(id))
    }

    async fn update_infrastructure(
        &self,
        id: &str,
        infrastructure: Infrastructure,
    ) -> Result<Deployment, StackError> {
        self.mutate(id, |record| {
            record.set_infrastructure(infrastructure);
            Ok(record.deployment.clone())
        })
        .await
    }

    async fn finalize(
        &self,
        id: &str,
        endpoints: Endpoints,
        health: Option<HealthReport>,
    ) -> Result<Deployment, StackError> {
        self.mutate(id, |record| {
            record.finalize(endpoints, health);
            Ok(record.deployment.clone())
        })
        .await
    }

    async fn record_health(&self, id: &str, report: HealthReport) -> Result<(), StackError> {
        self.mutate(id, |record| {
            record.set_health(report);
            Ok(())
        })
        .await
    }
}
