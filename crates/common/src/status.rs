//! Remote-observed service state and the terminal result of a deployment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EnvVar;

/// Readiness of the service's latest revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Rollout still in progress or not yet reported
    Unknown,
    /// Serving traffic
    Ready,
    /// Rollout finished unsuccessfully
    Failed,
}

/// One sample of the remote service's status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub readiness: Readiness,

    /// Externally reachable URL (only when ready)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Failure message (only when failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the reported condition last changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<DateTime<Utc>>,
}

impl ServiceStatus {
    pub fn unknown() -> Self {
        Self {
            readiness: Readiness::Unknown,
            url: None,
            message: None,
            last_transition: None,
        }
    }
}

/// Result of a successful reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    /// Canonical service name
    pub service: String,

    /// Externally reachable URL
    pub url: String,

    /// Remote logging console for this service
    pub log_url: String,

    /// Last observed transition of the ready condition
    pub last_transition: DateTime<Utc>,
}

/// Runtime defaults declared by an image's configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub env: Vec<EnvVar>,
    pub args: Vec<String>,
}

impl ContainerMetadata {
    pub fn is_empty(&self) -> bool {
        self.env.is_empty() && self.args.is_empty()
    }
}
