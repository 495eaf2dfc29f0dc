//! Workflow engine API client

use openapi_client::models::{WorkflowImportRequest, WorkflowListResponse, WorkflowSummary};

use crate::errors::StackError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Engine liveness
    pub async fn engine_health(&self) -> Result<serde_json::Value, StackError> {
        self.get("/healthz").await
    }

    /// Workflows known to the engine
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, StackError> {
        let response: WorkflowListResponse = self.get("/api/v1/workflows").await?;
        Ok(response.data)
    }

    /// Import a workflow definition
    pub async fn import_workflow(
        &self,
        request: &WorkflowImportRequest,
    ) -> Result<WorkflowSummary, StackError> {
        self.post("/api/v1/workflows", request).await
    }
}
