//! Health monitor worker
//!
//! Periodically refreshes the stored health snapshot of every running
//! deployment.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::orchestrator::Orchestrator;

/// Health monitor options
#[derive(Debug, Clone)]
pub struct Options {
    /// Refresh interval
    pub interval: Duration,

    /// Initial delay before the first refresh
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Run the health monitor worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &Orchestrator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health monitor starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Health monitor shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health monitor shutting down...");
                return;
            }
            refreshed = refresh_running(orchestrator) => {
                debug!("Refreshed health of {} deployments", refreshed);
            }
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health monitor shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

/// Refresh every running deployment, returns how many were refreshed
pub async fn refresh_running(orchestrator: &Orchestrator) -> usize {
    let deployments = match orchestrator.list().await {
        Ok(deployments) => deployments,
        Err(e) => {
            error!("Failed to list deployments: {}", e);
            return 0;
        }
    };

    let mut refreshed = 0;
    for deployment in deployments
        .iter()
        .filter(|d| d.status == DeploymentStatus::Running)
    {
        match orchestrator.refresh_health(&deployment.id).await {
            Ok(report) if !report.all_healthy() => {
                info!("[{}] degraded: {:?}", deployment.id, report.services);
                refreshed += 1;
            }
            Ok(_) => refreshed += 1,
            Err(e) => error!("[{}] health refresh failed: {}", deployment.id, e),
        }
    }
    refreshed
}
