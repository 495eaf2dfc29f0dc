//! Provider API models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Instance creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Deterministic instance name, doubles as the idempotency key
    pub name: String,
    pub region: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub memory_gb: u32,
    pub storage_gb: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Instance status as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Provisioning,
    Running,
    Failed,
    Terminating,
    Terminated,
    #[serde(other)]
    Unknown,
}

/// Instance description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceResponse {
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,

    /// Public address of the instance once it has one
    #[serde(default)]
    pub public_host: Option<String>,

    /// Docker engine address exposed by the instance
    #[serde(default)]
    pub docker_host: Option<String>,

    /// Provider failure reason
    #[serde(default)]
    pub error: Option<String>,
}

/// Instance resize request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleInstanceRequest {
    pub gpu_type: String,
    pub gpu_count: u32,
    pub memory_gb: u32,
    pub storage_gb: u32,
}

/// Policy application request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub action: String,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

/// Policy application response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub applied: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Workflow import request for the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowImportRequest {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<serde_json::Value>,
    #[serde(default)]
    pub connections: serde_json::Value,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Workflow summary returned by the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
}

/// Workflow list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowListResponse {
    pub data: Vec<WorkflowSummary>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
}
