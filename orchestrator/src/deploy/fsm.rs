//! Finite State Machine for deployment lifecycle

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Accepted, pipeline not started
    Pending,

    /// Pipeline in progress
    Provisioning,

    /// Resource shape being changed during provisioning
    Scaling,

    /// All services up, endpoints published
    Running,

    /// Teardown in progress
    Stopping,

    /// Torn down
    Stopped,

    /// Pipeline or lifecycle operation failed
    Failed,
}

impl DeploymentStatus {
    /// Terminal states cannot be left; retrying requires a new deployment
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Stopped | DeploymentStatus::Failed)
    }

    /// A pipeline or teardown currently owns the deployment
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Provisioning | DeploymentStatus::Scaling | DeploymentStatus::Stopping
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::Scaling => "scaling",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopping => "stopping",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Start the provisioning pipeline
    Provision,

    /// Every pipeline step succeeded
    ProvisionSucceeded,

    /// Resize while provisioning
    Scale,

    /// Resize finished
    ScaleCompleted,

    /// Begin teardown
    Stop,

    /// Teardown finished
    StopCompleted,

    /// Any failure
    Fail(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    status: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self::from_status(DeploymentStatus::Pending)
    }

    /// Resume the FSM from a persisted status
    pub fn from_status(status: DeploymentStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    /// Get current status
    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, String> {
        let new_status = match (&self.status, &event) {
            (DeploymentStatus::Pending, DeploymentEvent::Provision) => DeploymentStatus::Provisioning,

            (DeploymentStatus::Provisioning, DeploymentEvent::ProvisionSucceeded) => {
                DeploymentStatus::Running
            }
            (DeploymentStatus::Provisioning, DeploymentEvent::Scale) => DeploymentStatus::Scaling,

            (DeploymentStatus::Scaling, DeploymentEvent::ScaleCompleted) => {
                DeploymentStatus::Running
            }

            (DeploymentStatus::Running, DeploymentEvent::Stop) => DeploymentStatus::Stopping,

            (DeploymentStatus::Stopping, DeploymentEvent::StopCompleted) => {
                DeploymentStatus::Stopped
            }

            // Any non-terminal state may fail
            (state, DeploymentEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.status = new_status;
        Ok(new_status)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
