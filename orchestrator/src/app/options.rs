//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::orchestrator::OrchestratorOptions;
use crate::deploy::readiness::PollOptions;
use crate::events::mqtt::MqttAddress;
use crate::gateways::docker::{ContainerImages, RegistryCredentials};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{Settings, StoreKind};
use crate::utils::CooldownOptions;
use crate::workers::health_monitor;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Compute provider API
    pub provider: ProviderOptions,

    /// Container runtime
    pub containers: ContainerOptions,

    /// Workflow engine
    pub workflow_engine: WorkflowEngineOptions,

    /// Orchestrator tuning
    pub orchestrator: OrchestratorOptions,

    /// Enable the health monitor worker
    pub enable_health_monitor: bool,

    /// Health monitor worker options
    pub health_monitor: health_monitor::Options,

    /// MQTT progress publishing, none disables it
    pub mqtt: Option<MqttOptions>,

    /// Capacity of the in-process progress event bus
    pub event_buffer: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            server: ServerOptions::default(),
            provider: ProviderOptions::default(),
            containers: ContainerOptions::default(),
            workflow_engine: WorkflowEngineOptions::default(),
            orchestrator: OrchestratorOptions::default(),
            enable_health_monitor: true,
            health_monitor: health_monitor::Options::default(),
            mqtt: None,
            event_buffer: 256,
        }
    }
}

/// Secrets resolved from the environment at startup
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub provider_api_key: Option<SecretString>,
    pub model_token: Option<SecretString>,
    pub registry_password: Option<SecretString>,
    pub workflow_api_key: Option<SecretString>,
    pub mqtt_password: Option<SecretString>,
}

impl AppOptions {
    /// Build the options from the settings file and resolved secrets
    pub fn from_settings(settings: &Settings, layout: StorageLayout, secrets: Secrets) -> Self {
        let defaults = Self::default();
        let polling = &settings.polling;

        let registry = match (&settings.containers.registry, secrets.registry_password) {
            (Some(registry), Some(password)) => Some(RegistryCredentials {
                server: registry.server.clone(),
                username: registry.username.clone(),
                password,
            }),
            _ => None,
        };

        let mqtt = if settings.mqtt_broker.host.is_empty() {
            None
        } else {
            let broker = &settings.mqtt_broker;
            Some(MqttOptions {
                address: MqttAddress {
                    host: broker.host.clone(),
                    port: broker.port,
                    use_tls: broker.tls,
                    ca_cert_path: broker.ca_cert_path.clone(),
                    client_id: format!("stackpilot-{}", uuid::Uuid::new_v4().simple()),
                    username: broker.username.clone(),
                    password: secrets.mqtt_password,
                },
                ..MqttOptions::default()
            })
        };

        Self {
            storage: StorageOptions {
                layout,
                store: settings.store,
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            provider: ProviderOptions {
                base_url: settings.provider.base_url.clone(),
                api_key: secrets.provider_api_key,
                request_timeout: Duration::from_secs(settings.provider.request_timeout_secs),
                retry: CooldownOptions {
                    max_attempts: settings.provider.max_attempts.max(1),
                    ..CooldownOptions::default()
                },
            },
            containers: ContainerOptions {
                docker_binary: settings.containers.docker_binary.clone(),
                docker_port: settings.containers.docker_port,
                images: settings.containers.images.clone(),
                registry,
                model_token: secrets.model_token,
                container_poll: polling.container.to_options(),
                model_server_poll: polling.model_server.to_options(),
            },
            workflow_engine: WorkflowEngineOptions {
                api_key: secrets.workflow_api_key,
                poll: polling.workflow_engine.to_options(),
            },
            orchestrator: OrchestratorOptions {
                health_probe_timeout: Duration::from_secs(settings.health.probe_timeout_secs),
                compute_poll: polling.compute.to_options(),
            },
            enable_health_monitor: settings.health.enable_monitor,
            health_monitor: health_monitor::Options {
                interval: Duration::from_secs(settings.health.monitor_interval_secs.max(1)),
                ..defaults.health_monitor
            },
            mqtt,
            event_buffer: if settings.event_buffer == 0 {
                defaults.event_buffer
            } else {
                settings.event_buffer
            },
            lifecycle: defaults.lifecycle,
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, in-flight runs included
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Deployment record backend
    pub store: StoreKind,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Compute provider API options
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub request_timeout: Duration,
    pub retry: CooldownOptions,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/v1".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
            retry: CooldownOptions::default(),
        }
    }
}

/// Container runtime options
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    pub docker_binary: String,
    pub docker_port: u16,
    pub images: ContainerImages,
    pub registry: Option<RegistryCredentials>,
    pub model_token: Option<SecretString>,
    pub container_poll: PollOptions,
    pub model_server_poll: PollOptions,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            docker_port: 2376,
            images: ContainerImages::default(),
            registry: None,
            model_token: None,
            container_poll: PollOptions::container(),
            model_server_poll: PollOptions::model_server(),
        }
    }
}

/// Workflow engine options
#[derive(Debug, Clone)]
pub struct WorkflowEngineOptions {
    pub api_key: Option<SecretString>,
    pub poll: PollOptions,
}

impl Default for WorkflowEngineOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            poll: PollOptions::container(),
        }
    }
}

/// MQTT progress publishing options
#[derive(Debug, Clone)]
pub struct MqttOptions {
    pub address: MqttAddress,

    /// Outgoing request queue of the client
    pub capacity: usize,

    /// Delay before reconnecting after a connection error
    pub reconnect_delay: Duration,
}

impl Default for MqttOptions {
    fn default() -> Self {
        Self {
            address: MqttAddress::default(),
            capacity: 64,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}
