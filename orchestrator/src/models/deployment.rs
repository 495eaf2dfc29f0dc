//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::StackError;
use crate::models::resource::{HealthReport, ProvisionedResource};

/// Requested model size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelSize {
    #[serde(rename = "7B")]
    Small,
    #[serde(rename = "13B")]
    Medium,
    #[serde(rename = "70B")]
    Large,
}

impl ModelSize {
    /// Model served for this size class
    pub fn model_id(&self) -> &'static str {
        match self {
            ModelSize::Small => "mistralai/Mistral-7B-Instruct-v0.2",
            ModelSize::Medium => "meta-llama/Llama-2-13b-chat-hf",
            ModelSize::Large => "meta-llama/Llama-2-70b-chat-hf",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Small => "7B",
            ModelSize::Medium => "13B",
            ModelSize::Large => "70B",
        }
    }
}

impl FromStr for ModelSize {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "7B" => Ok(ModelSize::Small),
            "13B" => Ok(ModelSize::Medium),
            "70B" => Ok(ModelSize::Large),
            _ => Err(StackError::ValidationError(format!("Invalid model size: {}", s))),
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compliance class requested for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceClass {
    Baseline,
    Soc2,
    Hipaa,
    Gdpr,
    Legal,
}

impl ComplianceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceClass::Baseline => "baseline",
            ComplianceClass::Soc2 => "soc2",
            ComplianceClass::Hipaa => "hipaa",
            ComplianceClass::Gdpr => "gdpr",
            ComplianceClass::Legal => "legal",
        }
    }
}

impl FromStr for ComplianceClass {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "baseline" | "none" => Ok(ComplianceClass::Baseline),
            "soc2" => Ok(ComplianceClass::Soc2),
            "hipaa" => Ok(ComplianceClass::Hipaa),
            "gdpr" => Ok(ComplianceClass::Gdpr),
            "legal" => Ok(ComplianceClass::Legal),
            _ => Err(StackError::ValidationError(format!(
                "Invalid compliance class: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for ComplianceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Industry tag, drives branding and workflow templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Industry {
    Legal,
    Healthcare,
    Finance,
    General,
}

impl Industry {
    pub fn as_str(&self) -> &'static str {
        match self {
            Industry::Legal => "legal",
            Industry::Healthcare => "healthcare",
            Industry::Finance => "finance",
            Industry::General => "general",
        }
    }

    /// Chat UI title
    pub fn branding_title(&self) -> &'static str {
        match self {
            Industry::Legal => "Legal AI Assistant",
            Industry::Healthcare => "Healthcare AI Assistant",
            Industry::Finance => "Financial AI Assistant",
            Industry::General => "AI Document Assistant",
        }
    }

    /// Workflow templates imported into the workflow engine
    pub fn workflow_templates(&self) -> &'static [&'static str] {
        match self {
            Industry::Legal => &["document-intake", "contract-review", "clause-extraction"],
            Industry::Healthcare => &["document-intake", "patient-record-summary", "phi-redaction"],
            Industry::Finance => &["document-intake", "statement-analysis", "compliance-report"],
            Industry::General => &["document-intake", "document-summary"],
        }
    }
}

impl FromStr for Industry {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legal" => Ok(Industry::Legal),
            "healthcare" => Ok(Industry::Healthcare),
            "finance" => Ok(Industry::Finance),
            "" | "general" => Ok(Industry::General),
            _ => Err(StackError::ValidationError(format!("Invalid industry: {}", s))),
        }
    }
}

/// What the tenant asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentIntent {
    /// Display name used by the chat UI
    #[serde(default)]
    pub name: Option<String>,

    pub model_size: ModelSize,

    pub region: String,

    pub compliance: ComplianceClass,

    pub industry: Industry,

    #[serde(default)]
    pub use_case: Option<String>,
}

impl DeploymentIntent {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.industry.branding_title().to_string())
    }
}

/// GPU compute shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    pub gpu_type: String,
    pub gpu_count: u32,
    pub memory_gb: u32,
    pub storage_gb: u32,
}

impl InfrastructureConfig {
    /// Default shape for a model size class
    pub fn for_model_size(size: ModelSize) -> Self {
        let (gpu_type, gpu_count, memory_gb, storage_gb) = match size {
            ModelSize::Small => ("A10G", 1, 32, 200),
            ModelSize::Medium => ("A100-40GB", 1, 64, 300),
            ModelSize::Large => ("A100-80GB", 2, 160, 500),
        };
        Self {
            gpu_type: gpu_type.to_string(),
            gpu_count,
            memory_gb,
            storage_gb,
        }
    }
}

/// Confirmed infrastructure of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infrastructure {
    pub config: InfrastructureConfig,

    /// Compute handle, set once the instance was confirmed ready
    #[serde(default)]
    pub compute: Option<ProvisionedResource>,
}

/// Public URLs of a running deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub chat_ui: String,
    pub api: String,
    pub workflow: String,
    pub admin: String,
}

impl Endpoints {
    pub fn new(chat_ui: String, api: String, workflow: String) -> Self {
        let admin = format!("{}/admin", chat_ui.trim_end_matches('/'));
        Self {
            chat_ui,
            api,
            workflow,
            admin,
        }
    }
}

/// The unit of orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,

    pub organization_id: String,

    pub intent: DeploymentIntent,

    pub status: DeploymentStatus,

    #[serde(default)]
    pub infrastructure: Option<Infrastructure>,

    /// Only set while running
    #[serde(default)]
    pub endpoints: Option<Endpoints>,

    /// Only set when failed
    #[serde(default)]
    pub error_message: Option<String>,

    /// Last health snapshot
    #[serde(default)]
    pub health: Option<HealthReport>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Create a new pending deployment
    pub fn new(organization_id: impl Into<String>, intent: DeploymentIntent) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            intent,
            status: DeploymentStatus::Pending,
            infrastructure: None,
            endpoints: None,
            error_message: None,
            health: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compute handle, if one was confirmed
    pub fn compute(&self) -> Option<&ProvisionedResource> {
        self.infrastructure.as_ref().and_then(|i| i.compute.as_ref())
    }
}

/// Append-only progress record of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub deployment_id: String,
    pub step: u8,
    pub total_steps: u8,
    pub description: String,
    pub percentage: u8,
    pub timestamp: DateTime<Utc>,
}
