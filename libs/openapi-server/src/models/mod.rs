//! stackpilot API models

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub organization_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// "7B", "13B" or "70B"
    pub model_size: String,
    pub region: String,
    /// "baseline", "soc2", "hipaa", "gdpr" or "legal"
    #[serde(default = "default_compliance")]
    pub compliance: String,
    #[serde(default = "default_industry")]
    pub industry: String,
    #[serde(default)]
    pub use_case: Option<String>,
}

fn default_compliance() -> String {
    "baseline".to_string()
}

fn default_industry() -> String {
    "general".to_string()
}

/// Deployment accepted response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    pub deployment_id: String,
    pub status: String,
}

/// Scale request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub gpu_type: String,
    pub gpu_count: u32,
    pub memory_gb: u32,
    pub storage_gb: u32,
}

/// Teardown warning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownWarningResponse {
    pub resource: String,
    pub message: String,
}

/// Stop response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub deployment_id: String,
    pub status: String,
    pub warnings: Vec<TeardownWarningResponse>,
}

/// Container log response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub deployment_id: String,
    pub service: String,
    pub lines: Vec<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
