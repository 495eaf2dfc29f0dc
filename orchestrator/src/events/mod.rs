//! Progress events
//!
//! Publishing never blocks the pipeline and never fails it: a subscriber that
//! is gone or lagging just misses events.

pub mod mqtt;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::deploy::fsm::DeploymentStatus;
use crate::models::deployment::{DeploymentStep, Endpoints};

/// Typed progress event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StatusChanged {
        deployment_id: String,
        status: DeploymentStatus,
    },
    Step(DeploymentStep),
    Completed {
        deployment_id: String,
        endpoints: Endpoints,
    },
    Failed {
        deployment_id: String,
        error: String,
    },
}

impl ProgressEvent {
    pub fn deployment_id(&self) -> &str {
        match self {
            ProgressEvent::StatusChanged { deployment_id, .. }
            | ProgressEvent::Completed { deployment_id, .. }
            | ProgressEvent::Failed { deployment_id, .. } => deployment_id,
            ProgressEvent::Step(step) => &step.deployment_id,
        }
    }

    /// No more events follow for this deployment run
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. } | ProgressEvent::Failed { .. }
        )
    }
}

/// Fire-and-forget event sink
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, event: &ProgressEvent);
}

/// In-process bus backing the SSE endpoint
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressPublisher for BroadcastPublisher {
    fn publish(&self, event: &ProgressEvent) {
        // Err only means nobody is listening
        if self.sender.send(event.clone()).is_err() {
            trace!("No subscribers for {}", event.deployment_id());
        }
    }
}

/// Publishes every event to each inner publisher
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn ProgressPublisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn ProgressPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }
}

impl ProgressPublisher for FanoutPublisher {
    fn publish(&self, event: &ProgressEvent) {
        for publisher in &self.publishers {
            publisher.publish(event);
        }
    }
}
