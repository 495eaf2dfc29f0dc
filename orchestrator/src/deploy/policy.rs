//! Failure policies for orchestrator actions
//!
//! Building a stack fails fast: the first error aborts the pipeline. Tearing
//! it down fails soft: errors are downgraded to warnings so the remaining
//! resources still get released.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::StackError;

/// How an action failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Propagate the error
    Fatal,

    /// Record a warning and carry on
    Warn,
}

/// A teardown action that failed without aborting the teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownWarning {
    pub resource: String,
    pub message: String,
}

/// Run `action` under `policy`.
///
/// Returns `Ok(Some(value))` on success. A failed action either propagates
/// (`Fatal`) or is appended to `warnings` and yields `Ok(None)` (`Warn`).
pub async fn execute<T, Fut>(
    policy: FailurePolicy,
    resource: &str,
    action: Fut,
    warnings: &mut Vec<TeardownWarning>,
) -> Result<Option<T>, StackError>
where
    Fut: Future<Output = Result<T, StackError>>,
{
    match action.await {
        Ok(value) => Ok(Some(value)),
        Err(e) => match policy {
            FailurePolicy::Fatal => Err(e),
            FailurePolicy::Warn => {
                warn!("{} failed, continuing: {}", resource, e);
                warnings.push(TeardownWarning {
                    resource: resource.to_string(),
                    message: e.to_string(),
                });
                Ok(None)
            }
        },
    }
}
