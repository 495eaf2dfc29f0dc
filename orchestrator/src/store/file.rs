//! JSON file-per-deployment store

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::StackError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::{Deployment, DeploymentStep, Endpoints, Infrastructure};
use crate::models::resource::HealthReport;
use crate::store::{not_found, DeploymentStore, StoredDeployment};

/// Store writing one `<id>.json` document per deployment
pub struct FileStore {
    dir: Dir,

    // Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileStore {
    pub async fn open(dir: Dir) -> Result<Self, StackError> {
        dir.create().await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn record_file(&self, id: &str) -> Result<File, StackError> {
        // Ids are used as file names
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(not_found(id));
        }
        Ok(self.dir.file(&format!("{}.json", id)))
    }

    async fn read(&self, id: &str) -> Result<StoredDeployment, StackError> {
        let file = self.record_file(id)?;
        if !file.exists().await {
            return Err(not_found(id));
        }
        file.read_json()
            .await
            .map_err(|e| StackError::StorageError(format!("failed to read deployment {}: {}", id, e)))
    }

    async fn mutate<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut StoredDeployment) -> Result<T, StackError>,
    ) -> Result<T, StackError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read(id).await?;
        let value = f(&mut record)?;
        self.record_file(id)?.write_json(&record).await?;
        Ok(value)
    }
}

#[async_trait]
impl DeploymentStore for FileStore {
    async fn create(&self, deployment: &Deployment) -> Result<(), StackError> {
        let _guard = self.write_lock.lock().await;
        let file = self.record_file(&deployment.id)?;
        if file.exists().await {
            return Err(StackError::Conflict(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        file.write_json(&StoredDeployment::new(deployment.clone())).await
    }

    async fn get(&self, id: &str) -> Result<Deployment, StackError> {
        Ok(self.read(id).await?.deployment)
    }

    async fn list(&self) -> Result<Vec<Deployment>, StackError> {
        let mut deployments = Vec::new();
        for path in self.dir.list_files("json").await? {
            match File::new(&path).read_json::<StoredDeployment>().await {
                Ok(record) => deployments.push(record.deployment),
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
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
        Ok(self.read(id).await?.steps)
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
