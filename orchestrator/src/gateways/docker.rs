//! Docker container gateway
//!
//! Containers run on the compute instance through the docker CLI pointed at
//! the instance's engine (`docker -H <host>`). Container names are derived
//! from the deployment id so every call can be repeated safely: an existing
//! container is started if needed, never created twice.

use std::collections::HashSet;
use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::deploy::readiness::{wait_until_ready, PollOptions};
use crate::errors::StackError;
use crate::gateways::{endpoint_host, Branding, ContainerDeployer, RetrievalConfig};
use crate::models::resource::{ProvisionedResource, ResourceStatus, ServiceHealth, ServiceKind};
use crate::utils::tail_lines;

/// Images used for each service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerImages {
    pub model_server: String,
    pub vector_store: String,
    pub retrieval_pipeline: String,
    pub chat_ui: String,
    pub workflow_engine: String,
}

impl Default for ContainerImages {
    fn default() -> Self {
        Self {
            model_server: "ghcr.io/huggingface/text-generation-inference:1.4".to_string(),
            vector_store: "qdrant/qdrant:v1.7.4".to_string(),
            retrieval_pipeline: "ghcr.io/stackpilot/rag-pipeline:latest".to_string(),
            chat_ui: "ghcr.io/stackpilot/chat-ui:latest".to_string(),
            workflow_engine: "n8nio/n8n:1.25.0".to_string(),
        }
    }
}

/// Port a service is published on, on the instance and inside its container
pub fn service_ports(service: ServiceKind) -> (u16, u16) {
    match service {
        ServiceKind::ModelServer => (8080, 80),
        ServiceKind::VectorStore => (6333, 6333),
        ServiceKind::RetrievalPipeline => (8000, 8000),
        ServiceKind::ChatUi => (8501, 8501),
        ServiceKind::WorkflowEngine => (5678, 5678),
    }
}

/// Public URL of a service on a compute instance
pub fn service_url(compute: &ProvisionedResource, service: ServiceKind) -> Result<String, StackError> {
    let host = compute
        .endpoint
        .as_deref()
        .and_then(endpoint_host)
        .ok_or_else(|| {
            StackError::ProvisioningError(format!("{} has no public endpoint", compute.name))
        })?;
    Ok(format!("http://{}:{}", host, service_ports(service).0))
}

/// Registry login used before pulling private images
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub server: String,
    pub username: String,
    pub password: SecretString,
}

/// What `docker run` needs to create a container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<(u16, u16)>,
    pub env: Vec<(String, String)>,
    /// Secret variables. Only the names reach the command line, the values
    /// are handed to the docker CLI through its own environment.
    pub secrets: Vec<(String, SecretString)>,
    pub volumes: Vec<String>,
    pub gpus: bool,
    pub args: Vec<String>,
}

impl ContainerSpec {
    /// Arguments of `docker run`
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--restart".to_string(),
            "unless-stopped".to_string(),
        ];
        if self.gpus {
            args.extend(["--gpus".to_string(), "all".to_string()]);
        }
        for (host, container) in &self.ports {
            args.extend(["-p".to_string(), format!("{}:{}", host, container)]);
        }
        for (key, value) in &self.env {
            args.extend(["-e".to_string(), format!("{}={}", key, value)]);
        }
        for (key, _) in &self.secrets {
            args.extend(["-e".to_string(), key.clone()]);
        }
        for volume in &self.volumes {
            args.extend(["-v".to_string(), volume.clone()]);
        }
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

/// Container state as reported by `docker inspect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub status: String,
    pub health: Option<String>,
    pub restarts: u32,
}

const INSPECT_FORMAT: &str =
    "{{.State.Status}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}|{{.RestartCount}}";

/// Restarts after which a restarting container counts as crash looping
pub const MAX_RESTARTS: u32 = 3;

impl ContainerState {
    /// Parse the output of `docker inspect --format INSPECT_FORMAT`
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim().split('|');
        let status = fields.next().unwrap_or_default();
        if status.is_empty() {
            return None;
        }
        let health = fields.next().unwrap_or_default();
        let restarts = fields
            .next()
            .and_then(|count| count.parse().ok())
            .unwrap_or(0);
        Some(Self {
            status: status.to_string(),
            health: if health.is_empty() {
                None
            } else {
                Some(health.to_string())
            },
            restarts,
        })
    }

    pub fn readiness(&self) -> ResourceStatus {
        match (self.status.as_str(), self.health.as_deref()) {
            ("running", None | Some("healthy")) => ResourceStatus::Ready,
            ("exited" | "dead", _) => {
                ResourceStatus::Failed(format!("container {}", self.status))
            }
            // The restart policy hides crashes behind "restarting"
            ("restarting", Some("unhealthy")) => {
                ResourceStatus::Failed("container restarting while unhealthy".to_string())
            }
            ("restarting", _) if self.restarts >= MAX_RESTARTS => ResourceStatus::Failed(format!(
                "container crash looping ({} restarts)",
                self.restarts
            )),
            _ => ResourceStatus::Pending,
        }
    }

    pub fn health(&self) -> ServiceHealth {
        match self.readiness() {
            ResourceStatus::Ready => ServiceHealth::Healthy,
            _ => ServiceHealth::Unhealthy,
        }
    }
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

/// Thin async wrapper around the docker CLI
pub struct DockerCli {
    binary: String,
    docker_port: u16,
    registry: Option<RegistryCredentials>,
    logged_in: Mutex<HashSet<String>>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, docker_port: u16, registry: Option<RegistryCredentials>) -> Self {
        Self {
            binary: binary.into(),
            docker_port,
            registry,
            logged_in: Mutex::new(HashSet::new()),
        }
    }

    /// Docker engine address of a compute instance
    pub fn docker_host(&self, compute: &ProvisionedResource) -> Result<String, StackError> {
        if let Some(control) = compute.control_endpoint.as_deref() {
            return Ok(control.to_string());
        }
        compute
            .endpoint
            .as_deref()
            .and_then(endpoint_host)
            .map(|host| format!("tcp://{}:{}", host, self.docker_port))
            .ok_or_else(|| {
                StackError::ProvisioningError(format!("{} has no docker endpoint", compute.name))
            })
    }

    async fn run(&self, host: &str, args: &[String]) -> Result<Output, StackError> {
        self.run_with_secrets(host, args, &[]).await
    }

    async fn run_with_secrets(
        &self,
        host: &str,
        args: &[String],
        secrets: &[(String, SecretString)],
    ) -> Result<Output, StackError> {
        debug!("docker -H {} {}", host, args.join(" "));
        Command::new(&self.binary)
            .arg("-H")
            .arg(host)
            .args(args)
            .envs(secrets.iter().map(|(key, value)| (key, value.expose_secret())))
            .output()
            .await
            .map_err(|e| StackError::ProvisioningError(format!("Failed to run docker: {}", e)))
    }

    /// Log into the registry once per docker host
    async fn login(&self, host: &str) {
        let Some(registry) = &self.registry else {
            return;
        };
        let mut logged_in = self.logged_in.lock().await;
        if logged_in.contains(host) {
            return;
        }

        let result: Result<bool, std::io::Error> = async {
            let mut child = Command::new(&self.binary)
                .args(["-H", host, "login", registry.server.as_str()])
                .args(["-u", registry.username.as_str()])
                .arg("--password-stdin")
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(registry.password.expose_secret().as_bytes()).await?;
            }
            let output = child.wait_with_output().await?;
            Ok(output.status.success())
        }
        .await;

        match result {
            Ok(true) => {
                debug!("Logged into {} on {}", registry.server, host);
                logged_in.insert(host.to_string());
            }
            Ok(false) => warn!("Registry login to {} failed, attempting public pull", registry.server),
            Err(e) => warn!("Failed to run docker login: {}, attempting public pull", e),
        }
    }

    /// Current state of a container, `None` when it does not exist
    pub async fn inspect(&self, host: &str, name: &str) -> Result<Option<ContainerState>, StackError> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            INSPECT_FORMAT.to_string(),
            name.to_string(),
        ];
        let output = self.run(host, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing(&stderr) {
                return Ok(None);
            }
            return Err(StackError::ProvisioningError(format!(
                "docker inspect {} failed: {}",
                name,
                stderr.trim()
            )));
        }
        Ok(ContainerState::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Create the container, or start it if it already exists
    pub async fn ensure_container(&self, host: &str, spec: &ContainerSpec) -> Result<(), StackError> {
        let (args, secrets) = match self.inspect(host, &spec.name).await? {
            Some(state) if state.status == "running" => {
                info!("Container {} already running", spec.name);
                return Ok(());
            }
            Some(state) => {
                info!("Container {} exists ({}), starting it", spec.name, state.status);
                (vec!["start".to_string(), spec.name.clone()], &[][..])
            }
            None => {
                self.login(host).await;
                info!("Creating container {} from {}", spec.name, spec.image);
                (spec.run_args(), spec.secrets.as_slice())
            }
        };

        let output = self.run_with_secrets(host, &args, secrets).await?;
        if !output.status.success() {
            return Err(StackError::ProvisioningError(format!(
                "docker {} {} failed: {}",
                args[0],
                spec.name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Stop and remove a container, a missing container is not an error
    pub async fn remove(&self, host: &str, name: &str) -> Result<(), StackError> {
        for verb in ["stop", "rm"] {
            let output = self.run(host, &[verb.to_string(), name.to_string()]).await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if is_missing(&stderr) {
                    debug!("Container {} already gone", name);
                    return Ok(());
                }
                return Err(StackError::ProvisioningError(format!(
                    "docker {} {} failed: {}",
                    verb,
                    name,
                    stderr.trim()
                )));
            }
        }
        Ok(())
    }

    /// Last `tail` log lines, stdout and stderr combined
    pub async fn logs(&self, host: &str, name: &str, tail: usize) -> Result<Vec<String>, StackError> {
        let args = vec![
            "logs".to_string(),
            "--tail".to_string(),
            tail.to_string(),
            name.to_string(),
        ];
        let output = self.run(host, &args).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if is_missing(&stderr) {
                return Err(StackError::NotFound(format!("container {}", name)));
            }
            return Err(StackError::ProvisioningError(format!(
                "docker logs {} failed: {}",
                name,
                stderr.trim()
            )));
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&stderr);
        Ok(tail_lines(&text, tail))
    }
}

/// Container deployer driving the docker CLI
pub struct DockerContainerDeployer {
    docker: Arc<DockerCli>,
    images: ContainerImages,
    container_poll: PollOptions,
    model_server_poll: PollOptions,
    model_token: Option<SecretString>,
}

impl DockerContainerDeployer {
    pub fn new(
        docker: Arc<DockerCli>,
        images: ContainerImages,
        container_poll: PollOptions,
        model_server_poll: PollOptions,
        model_token: Option<SecretString>,
    ) -> Self {
        Self {
            docker,
            images,
            container_poll,
            model_server_poll,
            model_token,
        }
    }

    pub fn images(&self) -> &ContainerImages {
        &self.images
    }

    /// Start a service container and wait until it reports ready
    pub async fn run_service(
        &self,
        compute: &ProvisionedResource,
        service: ServiceKind,
        spec: &ContainerSpec,
        poll: PollOptions,
    ) -> Result<String, StackError> {
        let host = self.docker.docker_host(compute)?;
        let url = service_url(compute, service)?;
        self.docker.ensure_container(&host, spec).await?;

        let docker = self.docker.clone();
        wait_until_ready(
            &spec.name,
            || {
                let docker = docker.clone();
                let host = host.clone();
                let name = spec.name.clone();
                async move {
                    Ok(match docker.inspect(&host, &name).await? {
                        Some(state) => state.readiness(),
                        None => ResourceStatus::NotFound,
                    })
                }
            },
            poll,
        )
        .await?;

        info!("{} ready at {}", spec.name, url);
        Ok(url)
    }

    fn spec(&self, service: ServiceKind, deployment_id: &str, image: &str) -> ContainerSpec {
        ContainerSpec {
            name: service.resource_name(deployment_id),
            image: image.to_string(),
            ports: vec![service_ports(service)],
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerDeployer for DockerContainerDeployer {
    async fn deploy_model_server(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        model_id: &str,
    ) -> Result<String, StackError> {
        let mut spec = self.spec(ServiceKind::ModelServer, deployment_id, &self.images.model_server);
        spec.gpus = true;
        spec.volumes = vec![format!("models-{}:/data", deployment_id)];
        spec.args = vec!["--model-id".to_string(), model_id.to_string()];
        if let Some(token) = &self.model_token {
            spec.secrets
                .push(("HUGGING_FACE_HUB_TOKEN".to_string(), token.clone()));
        }
        self.run_service(compute, ServiceKind::ModelServer, &spec, self.model_server_poll)
            .await
    }

    async fn deploy_vector_store(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
    ) -> Result<String, StackError> {
        let mut spec = self.spec(ServiceKind::VectorStore, deployment_id, &self.images.vector_store);
        spec.volumes = vec![format!("vectordb-{}:/qdrant/storage", deployment_id)];
        self.run_service(compute, ServiceKind::VectorStore, &spec, self.container_poll)
            .await
    }

    async fn deploy_retrieval_pipeline(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        config: RetrievalConfig<'_>,
    ) -> Result<String, StackError> {
        let mut spec = self.spec(
            ServiceKind::RetrievalPipeline,
            deployment_id,
            &self.images.retrieval_pipeline,
        );
        spec.env = vec![
            ("VECTOR_DB_URL".to_string(), config.vector_store_url.to_string()),
            ("LLM_URL".to_string(), config.model_server_url.to_string()),
            ("COLLECTION_NAME".to_string(), format!("docs-{}", deployment_id)),
            ("INDUSTRY".to_string(), config.industry.as_str().to_string()),
        ];
        if let Some(use_case) = config.use_case {
            spec.env.push(("USE_CASE".to_string(), use_case.to_string()));
        }
        self.run_service(compute, ServiceKind::RetrievalPipeline, &spec, self.container_poll)
            .await
    }

    async fn deploy_chat_ui(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        retrieval_url: &str,
        branding: &Branding,
    ) -> Result<String, StackError> {
        let mut spec = self.spec(ServiceKind::ChatUi, deployment_id, &self.images.chat_ui);
        spec.env = vec![
            ("API_ENDPOINT".to_string(), retrieval_url.to_string()),
            ("DEPLOYMENT_ID".to_string(), deployment_id.to_string()),
            ("DEPLOYMENT_NAME".to_string(), branding.deployment_name.clone()),
            ("INDUSTRY_TEMPLATE".to_string(), branding.industry.as_str().to_string()),
        ];
        self.run_service(compute, ServiceKind::ChatUi, &spec, self.container_poll)
            .await
    }

    async fn stop(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        service: ServiceKind,
    ) -> Result<(), StackError> {
        let host = self.docker.docker_host(compute)?;
        self.docker
            .remove(&host, &service.resource_name(deployment_id))
            .await
    }

    async fn health_check(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        service: ServiceKind,
    ) -> Result<ServiceHealth, StackError> {
        let host = self.docker.docker_host(compute)?;
        let state = self
            .docker
            .inspect(&host, &service.resource_name(deployment_id))
            .await?;
        Ok(state.map_or(ServiceHealth::NotFound, |s| s.health()))
    }

    async fn logs(
        &self,
        compute: &ProvisionedResource,
        deployment_id: &str,
        service: ServiceKind,
        tail: usize,
    ) -> Result<Vec<String>, StackError> {
        let host = self.docker.docker_host(compute)?;
        self.docker
            .logs(&host, &service.resource_name(deployment_id), tail)
            .await
    }
}
