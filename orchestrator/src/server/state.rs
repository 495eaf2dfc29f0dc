//! Server state

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::app::state::ActiveRuns;
use crate::deploy::orchestrator::Orchestrator;
use crate::events::BroadcastPublisher;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub events: BroadcastPublisher,
    pub active_runs: Arc<ActiveRuns>,

    /// Process shutdown, cancels pipeline runs spawned by the server
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        events: BroadcastPublisher,
        active_runs: Arc<ActiveRuns>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            orchestrator,
            events,
            active_runs,
            shutdown_tx,
        }
    }
}
