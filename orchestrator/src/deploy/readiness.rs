//! Bounded-time readiness polling

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::StackError;
use crate::models::resource::ResourceStatus;

/// Polling budget for one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOptions {
    /// Total time budget
    pub timeout: Duration,

    /// Delay between two status checks
    pub interval: Duration,
}

impl PollOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// 10 minutes, polled every 10 seconds
    pub fn compute() -> Self {
        Self::new(Duration::from_secs(600), Duration::from_secs(10))
    }

    /// 2 minutes, polled every 5 seconds
    pub fn container() -> Self {
        Self::new(Duration::from_secs(120), Duration::from_secs(5))
    }

    /// Model load time dominates, so 10 minutes polled every 5 seconds
    pub fn model_server() -> Self {
        Self::new(Duration::from_secs(600), Duration::from_secs(5))
    }
}

/// Wait until `check` reports the resource as ready.
///
/// The first check runs immediately, the following ones every
/// `options.interval`. `NotFound` and `Pending` keep the poller going, a
/// `Failed` status aborts with a provisioning error and running out of budget
/// yields [`StackError::ReadinessTimeout`]. Errors returned by `check` itself
/// are treated as transient.
///
/// Returns the number of checks performed.
pub async fn wait_until_ready<F, Fut>(
    resource_id: &str,
    mut check: F,
    options: PollOptions,
) -> Result<u32, StackError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ResourceStatus, StackError>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    let mut last_error: Option<String> = None;

    loop {
        attempts += 1;
        let remaining = options.timeout.saturating_sub(started.elapsed());

        match tokio::time::timeout(remaining, check()).await {
            Ok(Ok(ResourceStatus::Ready)) => {
                debug!(
                    "{} ready after {} checks ({:?})",
                    resource_id,
                    attempts,
                    started.elapsed()
                );
                return Ok(attempts);
            }
            Ok(Ok(ResourceStatus::Failed(reason))) => {
                return Err(StackError::ProvisioningError(format!(
                    "{} reported failure: {}",
                    resource_id, reason
                )));
            }
            Ok(Ok(ResourceStatus::NotFound)) => {
                debug!("{} not found yet (check {})", resource_id, attempts);
            }
            Ok(Ok(ResourceStatus::Pending)) => {
                debug!("{} still pending (check {})", resource_id, attempts);
            }
            Ok(Err(e)) => {
                warn!("Status check for {} failed: {}", resource_id, e);
                last_error = Some(e.to_string());
            }
            Err(_) => {
                warn!("Status check for {} did not return within budget", resource_id);
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= options.timeout {
            return Err(StackError::ReadinessTimeout {
                resource: resource_id.to_string(),
                waited: elapsed,
                last_error,
            });
        }

        tokio::time::sleep(options.interval.min(options.timeout - elapsed)).await;
    }
}
