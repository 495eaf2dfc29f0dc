//! Application state management

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::EventLoop;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::app::options::{AppOptions, ContainerOptions, ProviderOptions};
use crate::deploy::orchestrator::Orchestrator;
use crate::errors::StackError;
use crate::events::mqtt::MqttPublisher;
use crate::events::{BroadcastPublisher, FanoutPublisher, ProgressPublisher};
use crate::gateways::compliance::HttpComplianceConfigurator;
use crate::gateways::compute::HttpComputeProvisioner;
use crate::gateways::docker::{DockerCli, DockerContainerDeployer};
use crate::gateways::workflow::EngineWorkflowDeployer;
use crate::gateways::Gateways;
use crate::http::{AuthScheme, HttpClient};
use crate::storage::settings::StoreKind;
use crate::store::{DeploymentStore, FileStore, MemoryStore};

/// Deployment ids with a pipeline run or a stop in flight
#[derive(Default)]
pub struct ActiveRuns {
    ids: Mutex<HashSet<String>>,
    idle: Notify,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an id, none if it is already claimed
    pub fn try_claim(self: &Arc<Self>, id: &str) -> Option<RunGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(RunGuard {
            runs: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until nothing is claimed
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, id: &str) {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.remove(id);
        if ids.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// Releases its id on drop
pub struct RunGuard {
    runs: Arc<ActiveRuns>,
    id: String,
}

impl RunGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.release(&self.id);
    }
}

/// Main application state
pub struct AppState {
    /// Deployment orchestrator
    pub orchestrator: Arc<Orchestrator>,

    /// In-process progress bus
    pub events: BroadcastPublisher,

    /// In-flight pipeline runs and stops
    pub active_runs: Arc<ActiveRuns>,

    /// MQTT publisher, kept to disconnect on shutdown
    pub mqtt: Option<Arc<MqttPublisher>>,
}

impl AppState {
    /// Initialize application state.
    ///
    /// Also returns the MQTT event loop when MQTT publishing is enabled, the
    /// caller is responsible for driving it.
    pub async fn init(options: &AppOptions) -> Result<(Self, Option<EventLoop>), StackError> {
        info!("Initializing application state...");

        let store: Arc<dyn DeploymentStore> = match options.storage.store {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::File => {
                let dir = options.storage.layout.deployments_dir();
                Arc::new(FileStore::open(dir).await?)
            }
        };

        let events = BroadcastPublisher::new(options.event_buffer);
        let mut publisher = FanoutPublisher::new().with(Arc::new(events.clone()));

        let mut mqtt = None;
        let mut eventloop = None;
        if let Some(mqtt_options) = &options.mqtt {
            match MqttPublisher::connect(&mqtt_options.address, mqtt_options.capacity) {
                Ok((client, loop_)) => {
                    let client = Arc::new(client);
                    publisher = publisher.with(client.clone());
                    mqtt = Some(client);
                    eventloop = Some(loop_);
                }
                // Progress over MQTT is optional, the SSE bus still works
                Err(e) => warn!("MQTT progress publishing disabled: {}", e),
            }
        }

        let gateways = build_gateways(options)?;
        let orchestrator = Orchestrator::new(store, Arc::new(publisher), gateways, options.orchestrator);

        let state = Self {
            orchestrator: Arc::new(orchestrator),
            events,
            active_runs: Arc::new(ActiveRuns::new()),
            mqtt,
        };
        Ok((state, eventloop))
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), StackError> {
        info!("Shutting down application state...");
        if let Some(mqtt) = &self.mqtt {
            if let Err(e) = mqtt.disconnect().await {
                warn!("Failed to disconnect from MQTT broker: {}", e);
            }
        }
        Ok(())
    }
}

fn provider_client(options: &ProviderOptions) -> Result<HttpClient, StackError> {
    Ok(HttpClient::new(&options.base_url, options.request_timeout)?
        .with_api_key(options.api_key.clone(), AuthScheme::Bearer)
        .with_retry(options.retry))
}

fn container_deployer(options: &ContainerOptions) -> DockerContainerDeployer {
    let docker = DockerCli::new(
        options.docker_binary.clone(),
        options.docker_port,
        options.registry.clone(),
    );
    DockerContainerDeployer::new(
        Arc::new(docker),
        options.images.clone(),
        options.container_poll,
        options.model_server_poll,
        options.model_token.clone(),
    )
}

/// Construct the production gateway set
pub fn build_gateways(options: &AppOptions) -> Result<Gateways, StackError> {
    let provider = provider_client(&options.provider)?;
    let containers = Arc::new(container_deployer(&options.containers));
    let workflow = EngineWorkflowDeployer::new(
        containers.clone(),
        options.workflow_engine.poll,
        options.workflow_engine.api_key.clone(),
        Duration::from_secs(30),
    );

    Ok(Gateways {
        compute: Arc::new(HttpComputeProvisioner::new(provider.clone())),
        containers,
        workflow: Arc::new(workflow),
        compliance: Arc::new(HttpComplianceConfigurator::new(provider)),
    })
}
