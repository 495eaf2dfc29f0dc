//! Compliance controls
//!
//! Each compliance class expands into a fixed, ordered list of actions. GDPR
//! builds on the SOC2 core and legal on the HIPAA core.

use std::fmt;

use async_trait::async_trait;
use openapi_client::models::PolicyRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::errors::StackError;
use crate::gateways::ComplianceConfigurator;
use crate::http::HttpClient;
use crate::models::deployment::ComplianceClass;
use crate::models::resource::ProvisionedResource;

/// Compliance action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplianceActionKind {
    EncryptionAtRest,
    EncryptionInTransit,
    AccessControl,
    AuditLogging,
    BackupPolicy,
    NetworkPolicy,
    DataResidency,
    ErasureRights,
    AttorneyClientPrivilege,
}

impl ComplianceActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceActionKind::EncryptionAtRest => "encryption-at-rest",
            ComplianceActionKind::EncryptionInTransit => "encryption-in-transit",
            ComplianceActionKind::AccessControl => "access-control",
            ComplianceActionKind::AuditLogging => "audit-logging",
            ComplianceActionKind::BackupPolicy => "backup-policy",
            ComplianceActionKind::NetworkPolicy => "network-policy",
            ComplianceActionKind::DataResidency => "data-residency",
            ComplianceActionKind::ErasureRights => "erasure-rights",
            ComplianceActionKind::AttorneyClientPrivilege => "attorney-client-privilege",
        }
    }
}

impl fmt::Display for ComplianceActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compliance sub-action with its settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceAction {
    pub kind: ComplianceActionKind,
    pub settings: serde_json::Value,
}

impl ComplianceAction {
    fn new(kind: ComplianceActionKind, settings: serde_json::Value) -> Self {
        Self { kind, settings }
    }
}

struct CoreLevels {
    access: &'static str,
    audit: &'static str,
    backup: &'static str,
    network: &'static str,
}

const BASELINE: CoreLevels = CoreLevels {
    access: "standard",
    audit: "standard",
    backup: "daily-7d",
    network: "default",
};

const SOC2: CoreLevels = CoreLevels {
    access: "rbac",
    audit: "detailed",
    backup: "daily-30d",
    network: "restricted",
};

const HIPAA: CoreLevels = CoreLevels {
    access: "strict",
    audit: "verbose",
    backup: "hourly-6y",
    network: "isolated",
};

fn core_actions(levels: &CoreLevels) -> Vec<ComplianceAction> {
    use ComplianceActionKind::*;
    vec![
        ComplianceAction::new(EncryptionAtRest, json!({ "algorithm": "AES-256" })),
        ComplianceAction::new(EncryptionInTransit, json!({ "min_tls": "1.2" })),
        ComplianceAction::new(AccessControl, json!({ "level": levels.access })),
        ComplianceAction::new(AuditLogging, json!({ "level": levels.audit })),
        ComplianceAction::new(BackupPolicy, json!({ "schedule": levels.backup })),
        ComplianceAction::new(NetworkPolicy, json!({ "profile": levels.network })),
    ]
}

/// Ordered actions of a compliance class
pub fn actions_for(class: ComplianceClass, region: &str) -> Vec<ComplianceAction> {
    match class {
        ComplianceClass::Baseline => core_actions(&BASELINE),
        ComplianceClass::Soc2 => core_actions(&SOC2),
        ComplianceClass::Hipaa => core_actions(&HIPAA),
        ComplianceClass::Gdpr => {
            let mut actions = core_actions(&SOC2);
            actions.push(ComplianceAction::new(
                ComplianceActionKind::DataResidency,
                json!({ "region": region }),
            ));
            actions.push(ComplianceAction::new(
                ComplianceActionKind::ErasureRights,
                json!({ "max_response_days": 30 }),
            ));
            actions
        }
        ComplianceClass::Legal => {
            let mut actions = core_actions(&HIPAA);
            actions.push(ComplianceAction::new(
                ComplianceActionKind::AttorneyClientPrivilege,
                json!({ "privileged_storage": true }),
            ));
            actions
        }
    }
}

/// Compliance configurator backed by the provider's policy API
pub struct HttpComplianceConfigurator {
    client: HttpClient,
}

impl HttpComplianceConfigurator {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    async fn apply_one(
        &self,
        instance_id: &str,
        action: &ComplianceAction,
        endpoints: &[String],
    ) -> Result<(), StackError> {
        let request = PolicyRequest {
            action: action.kind.to_string(),
            settings: action.settings.clone(),
            endpoints: endpoints.to_vec(),
        };
        let response = self.client.apply_policy(instance_id, &request).await?;
        if !response.applied {
            return Err(StackError::ProvisioningError(
                response
                    .message
                    .unwrap_or_else(|| "rejected by provider".to_string()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ComplianceConfigurator for HttpComplianceConfigurator {
    async fn apply(
        &self,
        compute: &ProvisionedResource,
        class: ComplianceClass,
        region: &str,
        endpoints: &[String],
    ) -> Result<Vec<ComplianceAction>, StackError> {
        let actions = actions_for(class, region);
        let mut failures = Vec::new();

        // Every action is attempted, failures are reported together
        for action in &actions {
            if let Err(e) = self.apply_one(&compute.id, action, endpoints).await {
                error!("Compliance action {} failed on {}: {}", action.kind, compute.id, e);
                failures.push(format!("{}: {}", action.kind, e));
            }
        }

        if !failures.is_empty() {
            return Err(StackError::ComplianceError {
                variant: class.to_string(),
                reason: failures.join("; "),
            });
        }

        info!("Applied {} {} actions to {}", actions.len(), class, compute.id);
        Ok(actions)
    }
}
