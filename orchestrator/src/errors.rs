//! Error types for the orchestrator

use std::time::Duration;

use thiserror::Error;

/// Main error type for stackpilot
#[derive(Error, Debug)]
pub enum StackError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A provider call failed or reported a failure sentinel
    #[error("Provisioning error: {0}")]
    ProvisioningError(String),

    /// A resource never reached its ready state within the budget
    #[error("Readiness timeout: {resource} not ready after {waited:?}{}", last_error_suffix(.last_error))]
    ReadinessTimeout {
        resource: String,
        waited: Duration,
        last_error: Option<String>,
    },

    #[error("Compliance configuration error ({variant}): {reason}")]
    ComplianceError { variant: String, reason: String },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Deployment cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("MQTT error: {0}")]
    MqttError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

impl From<anyhow::Error> for StackError {
    fn from(err: anyhow::Error) -> Self {
        StackError::Internal(err.to_string())
    }
}
