//! Settings file management
//!
//! Every field has a default so a partial (or empty) `settings.json` is
//! valid. Secrets are never stored in the file, only the names of the
//! environment variables holding them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deploy::readiness::PollOptions;
use crate::gateways::docker::ContainerImages;
use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,

    /// Emit JSON log lines
    pub log_json: bool,

    /// Also write daily rolling log files under the data directory
    pub log_to_file: bool,

    pub server: ServerSettings,

    pub provider: ProviderSettings,

    pub containers: ContainerSettings,

    pub workflow_engine: WorkflowEngineSettings,

    pub polling: PollingSettings,

    pub health: HealthSettings,

    pub mqtt_broker: MqttBrokerSettings,

    pub store: StoreKind,

    /// Capacity of the in-process progress event bus
    pub event_buffer: usize,
}

/// Deployment record backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    File,
}

/// HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Compute provider API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,

    /// Environment variable holding the provider API key
    pub api_key_env: String,

    pub request_timeout_secs: u64,

    /// Attempts per request on transient failures
    pub max_attempts: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/v1".to_string(),
            api_key_env: "STACKPILOT_PROVIDER_API_KEY".to_string(),
            request_timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

/// Container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    pub docker_binary: String,

    /// Docker engine port on compute instances without a control endpoint
    pub docker_port: u16,

    pub images: ContainerImages,

    pub registry: Option<RegistrySettings>,

    /// Environment variable holding the model hub token
    pub model_token_env: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            docker_port: 2376,
            images: ContainerImages::default(),
            registry: None,
            model_token_env: "HUGGING_FACE_HUB_TOKEN".to_string(),
        }
    }
}

/// Private registry login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    pub server: String,
    pub username: String,

    /// Environment variable holding the registry password
    pub password_env: String,
}

/// Workflow engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowEngineSettings {
    /// Environment variable holding the engine API key
    pub api_key_env: String,
}

impl Default for WorkflowEngineSettings {
    fn default() -> Self {
        Self {
            api_key_env: "STACKPILOT_WORKFLOW_API_KEY".to_string(),
        }
    }
}

/// Readiness budget of one resource kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollSettings {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl PollSettings {
    pub fn to_options(self) -> PollOptions {
        PollOptions::new(
            Duration::from_secs(self.timeout_secs),
            Duration::from_secs(self.interval_secs.max(1)),
        )
    }
}

impl From<PollOptions> for PollSettings {
    fn from(options: PollOptions) -> Self {
        Self {
            timeout_secs: options.timeout.as_secs(),
            interval_secs: options.interval.as_secs(),
        }
    }
}

/// Readiness budgets per resource kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub compute: PollSettings,
    pub container: PollSettings,
    pub model_server: PollSettings,
    pub workflow_engine: PollSettings,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            compute: PollOptions::compute().into(),
            container: PollOptions::container().into(),
            model_server: PollOptions::model_server().into(),
            workflow_engine: PollOptions::container().into(),
        }
    }
}

/// Health probing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub probe_timeout_secs: u64,

    /// Refresh the snapshot of running deployments in the background
    pub enable_monitor: bool,

    pub monitor_interval_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 10,
            enable_monitor: true,
            monitor_interval_secs: 60,
        }
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttBrokerSettings {
    /// Broker host, empty disables MQTT progress publishing
    pub host: String,

    pub port: u16,

    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    pub ca_cert_path: Option<String>,

    pub username: Option<String>,

    /// Environment variable holding the broker password
    pub password_env: String,
}

impl Default for MqttBrokerSettings {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 8883,
            tls: true,
            ca_cert_path: None,
            username: None,
            password_env: "STACKPILOT_MQTT_PASSWORD".to_string(),
        }
    }
}
