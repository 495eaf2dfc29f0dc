//! Compute provider API client

use openapi_client::models::{
    CreateInstanceRequest, InstanceResponse, PolicyRequest, PolicyResponse, ScaleInstanceRequest,
};

use crate::errors::StackError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Create an instance
    pub async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceResponse, StackError> {
        self.post("/instances", request).await
    }

    /// Get an instance by id or name
    pub async fn get_instance(&self, id_or_name: &str) -> Result<InstanceResponse, StackError> {
        let path = format!("/instances/{}", id_or_name);
        self.get(&path).await
    }

    /// Resize an instance
    pub async fn scale_instance(
        &self,
        instance_id: &str,
        request: &ScaleInstanceRequest,
    ) -> Result<InstanceResponse, StackError> {
        let path = format!("/instances/{}", instance_id);
        self.patch(&path, request).await
    }

    /// Delete an instance
    pub async fn delete_instance(&self, instance_id: &str) -> Result<(), StackError> {
        let path = format!("/instances/{}", instance_id);
        self.delete(&path).await
    }

    /// Apply a policy to an instance
    pub async fn apply_policy(
        &self,
        instance_id: &str,
        request: &PolicyRequest,
    ) -> Result<PolicyResponse, StackError> {
        let path = format!("/instances/{}/policies", instance_id);
        self.post(&path, request).await
    }
}
